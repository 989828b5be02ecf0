use std::path::Path;

use anyhow::{Context, Result};

use winebox_infra::store::SCHEMA;
use winebox_infra::{CellarConfig, LabelImages, LabelScan, OcrAdapter};
use winebox_label::LabelParser;

const USAGE: &str = "usage:
  winebox scan <front-image> [back-image]   scan a label and print the parsed fields as JSON
  winebox schema                            print the Postgres schema";

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    winebox_observability::init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match Command::parse(&args) {
        Some(Command::Scan { front, back }) => scan(Path::new(front), back.map(Path::new)).await,
        Some(Command::Schema) => {
            println!("{}", SCHEMA.trim());
            Ok(())
        }
        None => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Command<'a> {
    Scan { front: &'a str, back: Option<&'a str> },
    Schema,
}

impl<'a> Command<'a> {
    fn parse(args: &'a [String]) -> Option<Self> {
        match args {
            [cmd, front] if cmd == "scan" => Some(Self::Scan { front, back: None }),
            [cmd, front, back] if cmd == "scan" => Some(Self::Scan {
                front,
                back: Some(back),
            }),
            [cmd] if cmd == "schema" => Some(Self::Schema),
            _ => None,
        }
    }
}

async fn scan(front: &Path, back: Option<&Path>) -> Result<()> {
    let config = CellarConfig::from_env().context("invalid configuration")?;
    tracing::info!(vision = config.scan.vision_enabled(), "configuration loaded");

    let mut images = LabelImages::front(read(front)?);
    if let Some(back) = back {
        images = images.with_back(read(back)?);
    }

    let adapter = OcrAdapter::from_config(config.scan);
    let scan = adapter.scan(&images).await.context("scan failed")?;
    let outcome = LabelParser::new().parse(&scan);

    let report = LabelScan {
        scan,
        label: outcome.label,
        dropped: outcome.dropped,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_scan_with_optional_back() {
        let front_only = args(&["scan", "front.jpg"]);
        assert_eq!(
            Command::parse(&front_only),
            Some(Command::Scan {
                front: "front.jpg",
                back: None
            })
        );

        let both = args(&["scan", "front.jpg", "back.png"]);
        assert_eq!(
            Command::parse(&both),
            Some(Command::Scan {
                front: "front.jpg",
                back: Some("back.png")
            })
        );
    }

    #[test]
    fn rejects_unknown_or_incomplete_commands() {
        assert_eq!(Command::parse(&args(&[])), None);
        assert_eq!(Command::parse(&args(&["scan"])), None);
        assert_eq!(Command::parse(&args(&["scan", "a", "b", "c"])), None);
        assert_eq!(Command::parse(&args(&["checkout"])), None);
        assert_eq!(Command::parse(&args(&["schema"])), Some(Command::Schema));
    }
}
