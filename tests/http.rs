use sponsor_relay::client::{
    ExecuteArgs, ExecuteReturns, ObjectsArgs, ObjectsReturns, EXECUTE_METHOD, OBJECTS_METHOD,
};
use sponsor_relay::config::{Network, RelayConfig};
use sponsor_relay::identity::{LocalKey, SponsorKey};
use sponsor_relay::message::{RelayError, RelayErrorCode, RequestMessage, ResponseMessage};
use sponsor_relay::protocol::intent::IntentBytes;
use sponsor_relay::protocol::{AssetId, AssetRegistry, ObjectRef, TransactionDigest};
use sponsor_relay::testing::{address, object};
use sponsor_relay::transport::{LedgerNode, ObjectCatalog};
use sponsor_relay::{LocalOwnerSigner, NodeClient, SponsoredRelay, TransferRequest};
use std::io::Read;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A ledger node speaking the CBOR protocol over HTTP, on its own thread.
#[derive(Default)]
struct NodeState {
    objects: Vec<(ObjectsArgs, ObjectRef)>,
    execute_errors: Vec<RelayError>,
    executed: Vec<ExecuteArgs>,
    objects_calls: usize,
    cycle_cursors: bool,
}

fn handle(state: &Mutex<NodeState>, message: &RequestMessage) -> Result<Vec<u8>, RelayError> {
    let mut state = state.lock().unwrap();
    match message.method.as_str() {
        OBJECTS_METHOD => {
            state.objects_calls += 1;
            let args: ObjectsArgs = minicbor::decode(&message.data).unwrap();
            let owned: Vec<ObjectRef> = state
                .objects
                .iter()
                .filter(|(key, _)| key.owner == args.owner && key.asset == args.asset)
                .map(|(_, o)| *o)
                .collect();
            if state.cycle_cursors {
                let next = if args.cursor == Some(1) { 2 } else { 1 };
                let returns = ObjectsReturns {
                    objects: owned,
                    next_cursor: Some(next),
                };
                return Ok(minicbor::to_vec(returns).unwrap());
            }
            let start = args.cursor.unwrap_or(0) as usize;
            let end = (start + args.limit.unwrap_or(50) as usize).min(owned.len());
            let returns = ObjectsReturns {
                objects: owned[start..end].to_vec(),
                next_cursor: (end < owned.len()).then(|| end as u64),
            };
            Ok(minicbor::to_vec(returns).unwrap())
        }
        EXECUTE_METHOD => {
            let args: ExecuteArgs = minicbor::decode(&message.data).unwrap();
            state.executed.push(args.clone());
            if !state.execute_errors.is_empty() {
                return Err(state.execute_errors.remove(0));
            }
            let digest = TransactionDigest::new(IntentBytes::from_vec(args.intent).digest());
            Ok(minicbor::to_vec(ExecuteReturns { digest }).unwrap())
        }
        other => Err(RelayError::unknown(format!("no method {other}"))),
    }
}

fn serve(state: Arc<Mutex<NodeState>>) -> SocketAddr {
    let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
    let addr = server.server_addr();
    std::thread::spawn(move || {
        for mut request in server.incoming_requests() {
            let mut body = Vec::new();
            request.as_reader().read_to_end(&mut body).unwrap();
            let message = RequestMessage::from_bytes(&body).unwrap();
            let response = ResponseMessage::from_request(&message, handle(&state, &message));
            let _ = request.respond(tiny_http::Response::from_data(response.to_bytes().unwrap()));
        }
    });
    addr
}

fn client(addr: SocketAddr) -> NodeClient {
    NodeClient::new(format!("http://{addr}/"), Duration::from_secs(5))
        .unwrap()
        .with_page_size(2)
}

fn usdc() -> AssetId {
    AssetRegistry::builtin().lookup("USDC").unwrap().asset_id.clone()
}

fn key(owner: sponsor_relay::Address, asset: AssetId) -> ObjectsArgs {
    ObjectsArgs {
        owner,
        asset,
        cursor: None,
        limit: None,
    }
}

#[tokio::test]
async fn objects_are_read_page_by_page() {
    let owner = address(1);
    let state = Arc::new(Mutex::new(NodeState::default()));
    {
        let mut s = state.lock().unwrap();
        for seed in 0..5 {
            s.objects.push((key(owner, usdc()), object(seed, 10 + seed as u128)));
        }
        s.objects.push((key(address(2), usdc()), object(99, 1)));
    }
    let client = client(serve(state.clone()));

    let objects = client.objects(&owner, &usdc()).await.unwrap();
    assert_eq!(objects, (0..5).map(|s| object(s, 10 + s as u128)).collect::<Vec<_>>());
    assert_eq!(state.lock().unwrap().objects_calls, 3);

    let none = client.objects(&address(3), &usdc()).await.unwrap();
    assert!(none.is_empty());
}

#[tokio::test]
async fn cycling_cursors_are_rejected() {
    let owner = address(1);
    let state = Arc::new(Mutex::new(NodeState {
        cycle_cursors: true,
        ..Default::default()
    }));
    state
        .lock()
        .unwrap()
        .objects
        .push((key(owner, usdc()), object(0, 10)));
    let client = client(serve(state.clone()));

    let result = tokio::time::timeout(Duration::from_secs(5), client.objects(&owner, &usdc()))
        .await
        .expect("pager did not terminate");
    assert_eq!(result.unwrap_err().code, RelayErrorCode::CatalogUnavailable);
    assert_eq!(state.lock().unwrap().objects_calls, 3);
}

#[tokio::test]
async fn node_errors_keep_their_code() {
    let state = Arc::new(Mutex::new(NodeState::default()));
    state
        .lock()
        .unwrap()
        .execute_errors
        .push(RelayError::decode_or_bounds_error("trailing bytes"));
    let client = client(serve(state.clone()));

    let intent = IntentBytes::from_vec(vec![1, 2, 3]);
    let signatures = vec!["AQI=".to_string()];
    let err = client.execute(&intent, &signatures).await.unwrap_err();
    assert_eq!(err.code, RelayErrorCode::DecodeOrBoundsError);
    assert!(err.is_decode_or_bounds());

    let digest = client.execute(&intent, &signatures).await.unwrap();
    assert_eq!(digest, TransactionDigest::new(intent.digest()));
    assert_eq!(state.lock().unwrap().executed[1].signatures, signatures);
}

#[tokio::test]
async fn unreachable_node() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let client = client(addr);

    let err = client.objects(&address(1), &usdc()).await.unwrap_err();
    assert_eq!(err.code, RelayErrorCode::CatalogUnavailable);

    let err = client
        .execute(&IntentBytes::from_vec(vec![0]), &[])
        .await
        .unwrap_err();
    assert_eq!(err.code, RelayErrorCode::UnexpectedTransportError);
    assert!(!err.is_decode_or_bounds());
}

#[tokio::test]
async fn sponsored_transfer_over_http() {
    let owner = LocalOwnerSigner::new(LocalKey::secp256r1_from_seed(&[6; 32]).unwrap());
    let sponsor = SponsorKey::new(LocalKey::ed25519_from_seed(&[7; 32]).unwrap());
    let gas = AssetRegistry::builtin().fee_currency().asset_id.clone();

    let state = Arc::new(Mutex::new(NodeState::default()));
    {
        let mut s = state.lock().unwrap();
        s.objects.push((key(owner.address(), usdc()), object(1, 30_000_000)));
        s.objects.push((key(owner.address(), usdc()), object(2, 80_000_000)));
        s.objects.push((key(sponsor.address(), gas.clone()), object(3, 50)));
        s.objects.push((key(sponsor.address(), gas), object(4, 50_000_000)));
        s.execute_errors
            .push(RelayError::node_rejected("failed to deserialize signature"));
    }
    let addr = serve(state.clone());

    let config = RelayConfig::for_network(Network::Local, Some(&format!("http://{addr}")))
        .unwrap()
        .with_gas(1_000_000, 1);
    let relay = SponsoredRelay::new(
        NodeClient::from_config(&config).unwrap(),
        sponsor.clone(),
        &config,
    );

    let request = TransferRequest::new("50", "usdc", address(0xBEEF), owner.address());
    let digest = relay.send_sponsored(&request, &owner).await.unwrap();

    let state = state.lock().unwrap();
    assert_eq!(state.executed.len(), 2);
    let retried = &state.executed[1];
    let retried_bytes = IntentBytes::from_vec(retried.intent.clone());
    assert_eq!(digest, TransactionDigest::new(retried_bytes.digest()));
    assert_eq!(state.executed[0].intent, retried.intent);
    assert!(hex::decode(&retried.signatures[0]).is_ok());
    assert_eq!(state.executed[0].signatures[1], retried.signatures[1]);
}
