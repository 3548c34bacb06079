use relaylink_peer::decode_nprofile;
use serde::Serialize;

use crate::cmd::DecodeArgs;
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, print_pretty, OutputFormat};

#[derive(Serialize)]
struct DecodeOutput {
    pubkey: String,
    relays: Vec<String>,
}

pub fn run(args: DecodeArgs, format: OutputFormat) -> CliResult<i32> {
    let destination =
        decode_nprofile(&args.reference).map_err(|err| peer_error("decode failed", err))?;
    let out = DecodeOutput {
        pubkey: destination.pubkey,
        relays: destination.relays,
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&fields(&out)),
        OutputFormat::Pretty => print_pretty(&fields(&out)),
        OutputFormat::Raw => println!("{}", out.pubkey),
    }
    Ok(SUCCESS)
}

fn fields(out: &DecodeOutput) -> Vec<(&'static str, String)> {
    let relays = if out.relays.is_empty() {
        "(none)".to_string()
    } else {
        out.relays.join(", ")
    };
    vec![("pubkey", out.pubkey.clone()), ("relays", relays)]
}
