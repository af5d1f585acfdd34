use rand::Rng;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use reposcan_client::{Client, ClientConfig, ClientError};

use crate::metrics::Metrics;
use crate::safety::{History, OpKind, OpOutcome, OpRecord};
use crate::workload::{Op, WorkloadProfile};

/// Drive `node_addrs` with `profile` for `duration`, recording every operation.
/// Returns raw metrics and the full operation history for post-run correctness checking.
pub async fn run(
    node_addrs: Vec<SocketAddr>,
    profile: WorkloadProfile,
    key_space: usize,
    duration: Duration,
) -> (Metrics, History) {
    let clients: Vec<Client> = node_addrs
        .iter()
        .map(|addr| Client::new(ClientConfig { server_addr: addr.to_string() }))
        .collect();

    let mut rng = rand::thread_rng();
    let mut records: Vec<OpRecord> = Vec::new();
    let mut requests_total: u64 = 0;
    let mut errors_5xx: u64 = 0;
    let mut latency_ns: Vec<u64> = Vec::new();

    let run_start = Instant::now();

    while run_start.elapsed() < duration {
        let op = profile.sample(&mut rng);
        let repo = format!("repo{}", rng.gen_range(0..key_space));
        let client = &clients[rng.gen_range(0..clients.len())];

        let op_start = Instant::now();
        let (kind, outcome) = execute_op(client, op, "stress", &repo).await;
        let op_end = Instant::now();

        if is_error(&outcome) {
            errors_5xx += 1;
        }

        requests_total += 1;
        latency_ns.push((op_end - op_start).as_nanos() as u64);
        records.push(OpRecord { key: format!("stress/{repo}"), kind, outcome });
    }

    let elapsed_secs = run_start.elapsed().as_secs_f64();
    let metrics = Metrics { requests_total, errors_5xx, latency_ns, elapsed_secs };
    (metrics, History(records))
}

async fn execute_op(client: &Client, op: Op, user: &str, repo: &str) -> (OpKind, OpOutcome) {
    match op {
        Op::Queue => {
            let outcome = match client.queue(user, repo).await {
                Ok(()) => OpOutcome::QueueOk,
                Err(_) => OpOutcome::Error,
            };
            (OpKind::Queue, outcome)
        }
        Op::Results => {
            let outcome = match client.results(user, repo).await {
                Ok(envelope) => {
                    let issues_count = envelope
                        .results
                        .get("issues")
                        .and_then(|v| v.as_array())
                        .map(|a| a.len())
                        .unwrap_or(0);
                    OpOutcome::ResultsOk { tag: envelope.tag, issues_count }
                }
                Err(ClientError::NotFound(_)) => OpOutcome::NotFound,
                Err(ClientError::TimedOut) => OpOutcome::TimedOut,
                Err(_) => OpOutcome::Error,
            };
            (OpKind::Results, outcome)
        }
    }
}

/// Returns `true` if `outcome` represents a server-side error (5xx, including
/// a full queue, or a network failure).
pub fn is_error(outcome: &OpOutcome) -> bool {
    matches!(outcome, OpOutcome::Error)
}
