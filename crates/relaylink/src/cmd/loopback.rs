use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use relaylink_peer::{
    generate_private_key, ClientCluster, Destination, GenericStub, RpcRequest, STATUS_OK,
};
use relaylink_shard::split_into_shards;
use relaylink_transport::{KeyPair, MemoryRelay, OutboundMessage, RelayEvent};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing::{debug, warn};

use crate::cmd::LoopbackArgs;
use crate::exit::{
    io_error, peer_error, CliError, CliResult, DATA_INVALID, INTERNAL, SUCCESS, TIMEOUT, USAGE,
};
use crate::output::{payload_preview, print_fields, print_json, print_pretty, OutputFormat};

const LOOPBACK_RELAY: &str = "memory://loopback";
const LOOPBACK_KIND: u32 = 21000;

#[derive(Serialize)]
struct LoopbackOutput {
    rpc: String,
    destination: String,
    client_id: String,
    events_delivered: usize,
    elapsed_ms: f64,
    response: Value,
}

pub fn run(args: LoopbackArgs, format: OutputFormat) -> CliResult<i32> {
    let timeout = parse_timeout(&args.timeout)?;
    if args.shard_size == Some(0) {
        return Err(CliError::new(USAGE, "--shard-size must be greater than zero"));
    }
    let body = args
        .body
        .as_deref()
        .map(serde_json::from_str::<Value>)
        .transpose()
        .map_err(|err| CliError::new(DATA_INVALID, format!("invalid --body: {err}")))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .map_err(|err| io_error("failed to start runtime", err))?;
    let out = runtime.block_on(round_trip(&args.rpc, body, args.shard_size, timeout))?;

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&fields(&out)),
        OutputFormat::Pretty => print_pretty(&fields(&out)),
        OutputFormat::Raw => println!("{}", out.response),
    }
    Ok(SUCCESS)
}

async fn round_trip(
    rpc: &str,
    body: Option<Value>,
    shard_size: Option<usize>,
    timeout: Duration,
) -> CliResult<LoopbackOutput> {
    let relay = Arc::new(MemoryRelay::new());
    let outbound = relay
        .take_outbound()
        .ok_or_else(|| CliError::new(INTERNAL, "outbound stream already taken"))?;
    let cluster = ClientCluster::new(relay.clone());
    let delivered = Arc::new(AtomicUsize::new(0));
    let responder = tokio::spawn(respond(relay.clone(), outbound, shard_size, delivered.clone()));

    let remote = generate_private_key();
    let local = KeyPair::new(generate_private_key(), generate_private_key());
    let client = cluster
        .get_or_create_client(Destination::new(remote.clone(), [LOOPBACK_RELAY]), local, false)
        .await
        .map_err(|err| peer_error("client bring-up failed", err))?;
    let stub = client
        .stub()
        .as_any()
        .downcast_ref::<GenericStub>()
        .cloned()
        .ok_or_else(|| CliError::new(INTERNAL, "unexpected stub type"))?;

    let started = Instant::now();
    let result = tokio::time::timeout(timeout, stub.call(rpc, body)).await;
    let elapsed = started.elapsed();
    cluster.shutdown(None);
    responder.abort();

    let response = result
        .map_err(|_| CliError::new(TIMEOUT, format!("no reply within {timeout:?}")))?
        .map_err(|err| peer_error("call failed", err))?;

    Ok(LoopbackOutput {
        rpc: rpc.to_string(),
        destination: remote,
        client_id: client.id().to_string(),
        events_delivered: delivered.load(Ordering::SeqCst),
        elapsed_ms: (elapsed.as_secs_f64() * 1000.0 * 100.0).round() / 100.0,
        response,
    })
}

/// Plays the remote side: echo every request back, sharded and in reverse
/// fragment order when `shard_size` is set.
async fn respond(
    relay: Arc<MemoryRelay>,
    mut outbound: UnboundedReceiver<OutboundMessage>,
    shard_size: Option<usize>,
    delivered: Arc<AtomicUsize>,
) {
    let mut seq = 0u64;
    while let Some(message) = outbound.recv().await {
        let request: RpcRequest = match serde_json::from_str(&message.message) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "loopback responder got a non-RPC message");
                continue;
            }
        };
        let Some(request_id) = request.request_id.clone() else {
            continue;
        };

        let reply = json!({
            "requestId": request_id,
            "status": STATUS_OK,
            "rpcName": request.rpc_name,
            "echo": request.body,
        })
        .to_string();
        let contents = match shard_size {
            Some(size) => match split_into_shards(&reply, size, &format!("{request_id}-reply")) {
                Ok(fragments) => fragments,
                Err(err) => {
                    warn!(error = %err, "failed to shard reply");
                    continue;
                }
            },
            None => vec![reply],
        };
        debug!(request_id = %request_id, events = contents.len(), "loopback reply");

        for content in contents.into_iter().rev() {
            seq += 1;
            let event = RelayEvent {
                id: format!("loopback-{seq}"),
                author: message.destination.clone(),
                to: message.from.clone(),
                kind: LOOPBACK_KIND,
                content,
            };
            // Counted first: the last fragment resolves the caller inside deliver.
            delivered.fetch_add(1, Ordering::SeqCst);
            if !relay.deliver(event) {
                warn!("loopback relay has no handler installed");
            }
        }
    }
}

fn fields(out: &LoopbackOutput) -> Vec<(&'static str, String)> {
    vec![
        ("rpc", out.rpc.clone()),
        ("destination", out.destination.clone()),
        ("client_id", out.client_id.clone()),
        ("events", out.events_delivered.to_string()),
        ("elapsed", format!("{:.2}ms", out.elapsed_ms)),
        ("response", payload_preview(&out.response)),
    ]
}

fn parse_timeout(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    let (number, millis) = match input.strip_suffix("ms") {
        Some(number) => (number, true),
        None => (input.strip_suffix('s').unwrap_or(input), false),
    };
    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid timeout value: {input:?}")))?;
    if value == 0 {
        return Err(CliError::new(USAGE, "timeout must be greater than zero"));
    }
    Ok(if millis {
        Duration::from_millis(value)
    } else {
        Duration::from_secs(value)
    })
}
