use std::fs::File;
use std::io::{self, BufRead, BufReader};

use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use relaylink_shard::{CorrelatedPayload, Reassembly, ShardConfig, ShardReassembler};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::cmd::ReassembleArgs;
use crate::exit::{io_error, CliError, CliResult, DATA_INVALID, SUCCESS, USAGE};
use crate::output::{payload_preview, print_json, OutputFormat};

#[derive(Serialize)]
struct PayloadOutput<'a> {
    line: usize,
    request_id: &'a str,
    payload: &'a Value,
}

#[derive(Debug, Default, PartialEq, Eq)]
struct Summary {
    completed: usize,
    pending_fragments: usize,
    rejected: usize,
    open_sets: usize,
}

pub fn run(args: ReassembleArgs, format: OutputFormat) -> CliResult<i32> {
    if args.max_total_shards == 0 {
        return Err(CliError::new(USAGE, "--max-total-shards must be greater than zero"));
    }
    let reader: Box<dyn BufRead> = match &args.input {
        Some(path) => Box::new(BufReader::new(
            File::open(path).map_err(|err| io_error(&format!("open {}", path.display()), err))?,
        )),
        None => Box::new(BufReader::new(io::stdin())),
    };
    let reassembler = ShardReassembler::with_config(ShardConfig {
        max_total_shards: args.max_total_shards,
        ..ShardConfig::default()
    });

    let mut completed = Vec::new();
    let summary = feed(&reassembler, reader, |line, payload| {
        if let OutputFormat::Json | OutputFormat::Raw = format {
            emit(line, &payload, format);
        }
        completed.push((line, payload));
    })?;

    if let OutputFormat::Table | OutputFormat::Pretty = format {
        print_completed(&completed, format);
    }
    if summary.open_sets > 0 {
        warn!(open_sets = summary.open_sets, "input ended with incomplete shard sets");
    }

    if summary.rejected > 0 {
        return Err(CliError::new(
            DATA_INVALID,
            format!("{} line(s) could not be decoded", summary.rejected),
        ));
    }
    Ok(SUCCESS)
}

fn feed<R, F>(reassembler: &ShardReassembler, reader: R, mut on_payload: F) -> CliResult<Summary>
where
    R: BufRead,
    F: FnMut(usize, CorrelatedPayload),
{
    let mut summary = Summary::default();
    for (index, line) in reader.lines().enumerate() {
        let line_no = index + 1;
        let line = line.map_err(|err| io_error("read input", err))?;
        let content = line.trim();
        if content.is_empty() {
            continue;
        }

        match reassembler.push(content) {
            Ok(Reassembly::Complete(payload)) => {
                summary.completed += 1;
                on_payload(line_no, payload);
            }
            Ok(Reassembly::Incomplete {
                shards_id,
                received,
                total,
            }) => {
                summary.pending_fragments += 1;
                debug!(line = line_no, shards_id = %shards_id, received, total, "fragment stored");
            }
            Err(err) => {
                summary.rejected += 1;
                warn!(line = line_no, error = %err, "skipping line");
            }
        }
    }
    summary.open_sets = reassembler.open_sets();
    Ok(summary)
}

fn emit(line: usize, payload: &CorrelatedPayload, format: OutputFormat) {
    match format {
        OutputFormat::Raw => println!("{}", payload.body),
        _ => print_json(&PayloadOutput {
            line,
            request_id: &payload.request_id,
            payload: &payload.body,
        }),
    }
}

fn print_completed(completed: &[(usize, CorrelatedPayload)], format: OutputFormat) {
    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["LINE", "REQUEST ID", "PAYLOAD"]);
            for (line, payload) in completed {
                table.add_row(vec![
                    line.to_string(),
                    payload.request_id.clone(),
                    payload_preview(&payload.body),
                ]);
            }
            println!("{table}");
        }
        _ => {
            for (line, payload) in completed {
                println!(
                    "line={} request_id={} payload={}",
                    line,
                    payload.request_id,
                    payload_preview(&payload.body)
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use relaylink_shard::split_into_shards;
    use serde_json::json;

    use super::*;

    #[test]
    fn feeds_mixed_lines_and_counts_outcomes() {
        let reply = json!({ "requestId": "r1", "status": "OK", "items": [1, 2, 3] }).to_string();
        let mut fragments = split_into_shards(&reply, 10, "set-1").unwrap();
        fragments.reverse();

        let mut input = String::new();
        input.push_str("{\"requestId\":\"direct\"}\n\n");
        for fragment in &fragments {
            input.push_str(fragment);
            input.push('\n');
        }
        input.push_str("garbage\n");
        input.push_str("{\"shardsId\":\"lonely\",\"index\":0,\"totalShards\":2,\"shard\":\"{\"}\n");

        let reassembler = ShardReassembler::new();
        let mut seen = Vec::new();
        let summary = feed(&reassembler, Cursor::new(input), |line, payload| {
            seen.push((line, payload.request_id));
        })
        .unwrap();

        assert_eq!(
            summary,
            Summary {
                completed: 2,
                pending_fragments: fragments.len(),
                rejected: 1,
                open_sets: 1,
            }
        );
        assert_eq!(seen[0], (1, "direct".to_string()));
        assert_eq!(seen[1], (2 + fragments.len(), "r1".to_string()));
    }
}
