use anyhow::{Context, Result, anyhow, bail};
use chrono::{DateTime, Utc};
use ledgerbridge_api::{RemoteId, ServerId};
use std::path::PathBuf;

pub const USAGE: &str = "\
usage: ledgerbridge [--config PATH] [--state PATH] [--cursors PATH] <command>

commands:
  sync-item <item code>               reconcile an item with every linked product
  sync-product <server> <id>          reconcile a remote product
  sync-order <sales order>            reconcile a local sales order
  sync-remote-order <server> <id>     reconcile a remote order
  reset-item <item code>              forget sync markers, then push the item
  reset-order <sales order>           forget the sync marker, then push the order
  sweep-items [--since RFC3339]       reconcile products modified since the cursor
  sweep-orders [--since RFC3339]      reconcile orders modified since the cursor
  product-links <item code>           list the remote products of an item
  upload-media <server> <file>        upload an image to the media library
  delete-media <server> <id>          delete a media library entry

LEDGERBRIDGE_CONFIG overrides the default config path; RUST_LOG sets the log level.";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SyncItem { code: String },
    SyncProduct { server: ServerId, id: RemoteId },
    SyncOrder { name: String },
    SyncRemoteOrder { server: ServerId, id: RemoteId },
    ResetItem { code: String },
    ResetOrder { name: String },
    SweepItems { since: Option<DateTime<Utc>> },
    SweepOrders { since: Option<DateTime<Utc>> },
    ProductLinks { code: String },
    UploadMedia { server: ServerId, file: PathBuf },
    DeleteMedia { server: ServerId, id: u64 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Args {
    pub config: PathBuf,
    pub state: PathBuf,
    pub cursors: PathBuf,
    pub command: Command,
}

fn next_value(args: &mut impl Iterator<Item = String>, what: &str) -> Result<String> {
    args.next().ok_or_else(|| anyhow!("missing {}", what))
}

fn remote_id(value: &str) -> Result<RemoteId> {
    value
        .parse::<u64>()
        .map(RemoteId)
        .with_context(|| format!("invalid remote id '{}'", value))
}

fn since(args: &mut impl Iterator<Item = String>) -> Result<Option<DateTime<Utc>>> {
    match args.next() {
        None => Ok(None),
        Some(flag) if flag == "--since" => {
            let value = next_value(args, "value for --since")?;
            let at = DateTime::parse_from_rfc3339(&value)
                .with_context(|| format!("invalid --since timestamp '{}'", value))?;
            Ok(Some(at.with_timezone(&Utc)))
        }
        Some(other) => bail!("unexpected argument '{}'", other),
    }
}

/// Parses everything after the program name.
pub fn parse(args: impl IntoIterator<Item = String>, default_config: PathBuf) -> Result<Args> {
    let mut args = args.into_iter();
    let mut config = default_config;
    let mut state = PathBuf::from("ledgerbridge-state.json");
    let mut cursors = PathBuf::from("ledgerbridge-cursors.json");

    let name = loop {
        let arg = args.next().ok_or_else(|| anyhow!("missing command"))?;
        match arg.as_str() {
            "--config" | "-c" => config = PathBuf::from(next_value(&mut args, "config path")?),
            "--state" => state = PathBuf::from(next_value(&mut args, "state path")?),
            "--cursors" => cursors = PathBuf::from(next_value(&mut args, "cursor path")?),
            flag if flag.starts_with('-') => bail!("unknown option '{}'", flag),
            _ => break arg,
        }
    };

    let command = match name.as_str() {
        "sync-item" => Command::SyncItem {
            code: next_value(&mut args, "item code")?,
        },
        "sync-product" => Command::SyncProduct {
            server: ServerId::new(next_value(&mut args, "server")?),
            id: remote_id(&next_value(&mut args, "product id")?)?,
        },
        "sync-order" => Command::SyncOrder {
            name: next_value(&mut args, "sales order name")?,
        },
        "sync-remote-order" => Command::SyncRemoteOrder {
            server: ServerId::new(next_value(&mut args, "server")?),
            id: remote_id(&next_value(&mut args, "order id")?)?,
        },
        "reset-item" => Command::ResetItem {
            code: next_value(&mut args, "item code")?,
        },
        "reset-order" => Command::ResetOrder {
            name: next_value(&mut args, "sales order name")?,
        },
        "sweep-items" => Command::SweepItems {
            since: since(&mut args)?,
        },
        "sweep-orders" => Command::SweepOrders {
            since: since(&mut args)?,
        },
        "product-links" => Command::ProductLinks {
            code: next_value(&mut args, "item code")?,
        },
        "upload-media" => Command::UploadMedia {
            server: ServerId::new(next_value(&mut args, "server")?),
            file: PathBuf::from(next_value(&mut args, "file")?),
        },
        "delete-media" => Command::DeleteMedia {
            server: ServerId::new(next_value(&mut args, "server")?),
            id: next_value(&mut args, "media id")?
                .parse()
                .context("invalid media id")?,
        },
        other => bail!("unknown command '{}'", other),
    };

    if let Some(extra) = args.next() {
        bail!("unexpected argument '{}'", extra);
    }
    Ok(Args {
        config,
        state,
        cursors,
        command,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(line: &str) -> Result<Args> {
        parse(
            line.split_whitespace().map(str::to_string),
            PathBuf::from("ledgerbridge.yaml"),
        )
    }

    #[test]
    fn test_options_before_command() {
        let args = parse_str("--config shop.yaml --state s.json sync-product shop.example.com 17")
            .unwrap();
        assert_eq!(args.config, PathBuf::from("shop.yaml"));
        assert_eq!(args.state, PathBuf::from("s.json"));
        assert_eq!(args.cursors, PathBuf::from("ledgerbridge-cursors.json"));
        assert_eq!(
            args.command,
            Command::SyncProduct {
                server: ServerId::new("shop.example.com"),
                id: RemoteId(17)
            }
        );
    }

    #[test]
    fn test_sweep_since() {
        let args = parse_str("sweep-orders --since 2024-01-01T00:00:00Z").unwrap();
        match args.command {
            Command::SweepOrders { since: Some(at) } => {
                assert_eq!(at.to_rfc3339(), "2024-01-01T00:00:00+00:00")
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert_eq!(
            parse_str("sweep-items").unwrap().command,
            Command::SweepItems { since: None }
        );
    }

    #[test]
    fn test_errors() {
        assert!(parse_str("").is_err());
        assert!(parse_str("sync-product shop.example.com abc").is_err());
        assert!(parse_str("sync-item A B").is_err());
        assert!(parse_str("--verbose sync-item A").is_err());
        assert!(parse_str("sweep-items --since yesterday").is_err());
        assert!(parse_str("launch").is_err());
    }
}
