use anyhow::{anyhow, Context};
use clap::Parser;
use sponsor_relay::config::{
    Network, RelayConfig, NETWORK_ENV, NODE_URL_ENV, SPONSOR_SECRET_ENV,
};
use sponsor_relay::identity::{Address, LocalKey, SponsorKey};
use sponsor_relay::protocol::intent::UnsignedIntent;
use sponsor_relay::signature::Encoding;
use sponsor_relay::{LocalOwnerSigner, NodeClient, SponsoredRelay, TransferRequest};
use std::path::PathBuf;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
struct Opts {
    /// Increase output logging verbosity to DEBUG level.
    #[clap(short, long, parse(from_occurrences))]
    verbose: i8,

    /// Suppress all output logging. Can be used multiple times to suppress more.
    #[clap(short, long, parse(from_occurrences))]
    quiet: i8,

    /// The network to talk to (mainnet, testnet or local).
    #[clap(long, env = NETWORK_ENV, default_value = "local")]
    network: Network,

    /// The ledger node endpoint. Required for public networks.
    #[clap(long, env = NODE_URL_ENV)]
    node_url: Option<String>,

    /// The sponsor's secret key: a PKCS#8 PEM, or a hex or base64 seed.
    #[clap(long, env = SPONSOR_SECRET_ENV, hide_env_values = true)]
    sponsor_key: String,

    /// Gas budget for each transfer, in minor units of the fee currency.
    #[clap(long)]
    gas_budget: Option<u64>,

    /// Gas price for each transfer.
    #[clap(long)]
    gas_price: Option<u64>,

    /// The encoding given to signatures that carry no marker of their own.
    #[clap(long, default_value = "base64")]
    encoding: Encoding,

    #[clap(subcommand)]
    subcommand: SubCommand,
}

#[derive(Parser)]
enum SubCommand {
    /// Shows the sponsor's address.
    Address,

    /// Builds a transfer intent and prints it without signing.
    Intent(IntentOpt),

    /// Signs and submits a transfer.
    Send(SendOpt),
}

#[derive(Parser)]
struct TransferOpt {
    /// The decimal amount to transfer, e.g. `12.5`.
    amount: String,

    /// The asset symbol, e.g. `USDC`.
    asset: String,

    /// The recipient's address.
    #[clap(long)]
    to: Address,

    /// Let the sender pay gas instead of the sponsor.
    #[clap(long)]
    direct: bool,
}

#[derive(Parser)]
struct IntentOpt {
    #[clap(flatten)]
    transfer: TransferOpt,

    /// The sender's address.
    #[clap(long)]
    from: Address,

    /// If true, prints out the hex value of the intent bytes.
    #[clap(long, conflicts_with_all(&["base64", "diag"]))]
    hex: bool,

    /// If true, prints out the base64 value of the intent bytes.
    #[clap(long, conflicts_with_all(&["hex", "diag"]))]
    base64: bool,

    /// If true, prints out the intent in CBOR diagnostic notation.
    #[clap(long, conflicts_with_all(&["hex", "base64"]))]
    diag: bool,
}

#[derive(Parser)]
struct SendOpt {
    #[clap(flatten)]
    transfer: TransferOpt,

    /// A PEM file holding the owner's key. The owner is the sender.
    #[clap(long)]
    owner_pem: PathBuf,
}

fn init_logging(verbose: i8, quiet: i8) {
    let level = match 2 + verbose - quiet {
        x if x > 3 => LevelFilter::TRACE,
        3 => LevelFilter::DEBUG,
        2 => LevelFilter::INFO,
        1 => LevelFilter::WARN,
        0 => LevelFilter::ERROR,
        _ => LevelFilter::OFF,
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(level.into()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn print_intent(intent: &UnsignedIntent, opt: &IntentOpt) -> anyhow::Result<()> {
    let bytes = intent.to_bytes()?;
    if opt.hex {
        println!("{}", bytes.to_hex());
    } else if opt.base64 {
        println!("{}", bytes.to_base64());
    } else if opt.diag {
        let diag = cbor_diag::parse_bytes(bytes.as_slice())
            .map_err(|e| anyhow!("could not render intent: {e}"))?;
        println!("{}", diag.to_diag_pretty());
    } else {
        println!("{:#?}", intent);
    }
    Ok(())
}

fn connect(opts: &Opts, sponsor: SponsorKey) -> anyhow::Result<SponsoredRelay<NodeClient>> {
    let defaults = RelayConfig::for_network(opts.network, opts.node_url.as_deref())?;
    let config = defaults
        .clone()
        .with_default_encoding(opts.encoding)
        .with_gas(
            opts.gas_budget.unwrap_or(defaults.gas_budget),
            opts.gas_price.unwrap_or(defaults.gas_price),
        );
    let client = NodeClient::from_config(&config)?;
    Ok(SponsoredRelay::new(client, sponsor, &config))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts: Opts = Opts::parse();
    init_logging(opts.verbose, opts.quiet);

    let sponsor = SponsorKey::from_secret(&opts.sponsor_key).context("loading the sponsor key")?;
    tracing::debug!(
        address = %sponsor.address(),
        scheme = sponsor.scheme().name(),
        "sponsor key loaded"
    );

    match &opts.subcommand {
        SubCommand::Address => println!("{}", sponsor.address()),
        SubCommand::Intent(o) => {
            let relay = connect(&opts, sponsor)?;
            let request = TransferRequest::new(
                &o.transfer.amount,
                &o.transfer.asset,
                o.transfer.to,
                o.from,
            );
            let intent = if o.transfer.direct {
                relay.prepare_direct(&request).await?
            } else {
                relay.prepare_sponsored(&request).await?
            };
            print_intent(&intent, o)?;
        }
        SubCommand::Send(o) => {
            let relay = connect(&opts, sponsor)?;
            let pem = std::fs::read_to_string(&o.owner_pem)
                .with_context(|| format!("reading {}", o.owner_pem.display()))?;
            let owner = LocalOwnerSigner::new(LocalKey::from_pem(pem)?);
            let request = TransferRequest::new(
                &o.transfer.amount,
                &o.transfer.asset,
                o.transfer.to,
                owner.address(),
            );
            let digest = if o.transfer.direct {
                relay.send_direct(&request, &owner).await?
            } else {
                relay.send_sponsored(&request, &owner).await?
            };
            println!("{}", digest);
        }
    }
    Ok(())
}
