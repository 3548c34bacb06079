use relaylink_peer::{
    private_key, set_private_key, FileKeyStore, KeyStore, MemoryKeyStore, PeerError,
};
use serde::Serialize;

use crate::cmd::KeygenArgs;
use crate::exit::{peer_error, CliResult, SUCCESS};
use crate::output::{print_fields, print_json, print_pretty, OutputFormat};

#[derive(Serialize)]
struct KeygenOutput {
    key_file: Option<String>,
    generated: bool,
    replaced: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    private_key: Option<String>,
}

pub fn run(args: KeygenArgs, format: OutputFormat) -> CliResult<i32> {
    let store: Box<dyn KeyStore> = match &args.key_file {
        Some(path) => Box::new(FileKeyStore::new(path)),
        None => Box::new(MemoryKeyStore::new()),
    };

    let (key, generated, replaced) = apply(store.as_ref(), &args)
        .map_err(|err| peer_error("keygen failed", err))?;

    let out = KeygenOutput {
        key_file: args.key_file.as_ref().map(|p| p.display().to_string()),
        generated,
        replaced,
        private_key: (args.show || args.key_file.is_none()).then_some(key),
    };

    match format {
        OutputFormat::Json => print_json(&out),
        OutputFormat::Table => print_fields(&fields(&out)),
        OutputFormat::Pretty => print_pretty(&fields(&out)),
        OutputFormat::Raw => {
            if let Some(key) = &out.private_key {
                println!("{key}");
            }
        }
    }
    Ok(SUCCESS)
}

/// Returns the active key, whether it was generated, and whether an existing
/// key was overwritten.
fn apply(store: &dyn KeyStore, args: &KeygenArgs) -> Result<(String, bool, bool), PeerError> {
    let existing = private_key(store)?;
    if let Some(nsec) = &args.nsec {
        let key = set_private_key(store, Some(nsec))?;
        let replaced = existing.is_some_and(|old| old != key);
        return Ok((key, false, replaced));
    }
    match existing {
        Some(key) if !args.force_generate => Ok((key, false, false)),
        existing => {
            let key = set_private_key(store, None)?;
            Ok((key, true, existing.is_some()))
        }
    }
}

fn fields(out: &KeygenOutput) -> Vec<(&'static str, String)> {
    let mut fields = vec![
        (
            "key_file",
            out.key_file.clone().unwrap_or_else(|| "(memory)".to_string()),
        ),
        ("generated", out.generated.to_string()),
        ("replaced", out.replaced.to_string()),
    ];
    if let Some(key) = &out.private_key {
        fields.push(("private_key", key.clone()));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "5ee1c8000ab28edd64d74a7d951ac2dd559814887b1b9e1ac7c5f89e96125c12";

    fn args(nsec: Option<&str>, force_generate: bool) -> KeygenArgs {
        KeygenArgs {
            key_file: None,
            nsec: nsec.map(str::to_string),
            force_generate,
            show: false,
        }
    }

    #[test]
    fn existing_key_is_kept_unless_forced() {
        let store = MemoryKeyStore::new();
        store.store(KEY).unwrap();

        let (key, generated, replaced) = apply(&store, &args(None, false)).unwrap();
        assert_eq!(key, KEY);
        assert!(!generated && !replaced);

        let (key, generated, replaced) = apply(&store, &args(None, true)).unwrap();
        assert_ne!(key, KEY);
        assert!(generated && replaced);
    }

    #[test]
    fn explicit_key_replaces_existing() {
        let store = MemoryKeyStore::new();
        let (first, generated, _) = apply(&store, &args(None, false)).unwrap();
        assert!(generated);

        let (key, generated, replaced) = apply(&store, &args(Some(KEY), false)).unwrap();
        assert_eq!(key, KEY);
        assert!(!generated);
        assert_eq!(replaced, first != KEY);
    }
}
