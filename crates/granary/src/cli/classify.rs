//! Classify command - show which product kind each file name maps to

use crate::cli::error::HelpfulError;
use crate::cli::output::{print_json, print_table};
use serde::Serialize;
use std::path::{Path, PathBuf};

#[derive(Debug)]
pub struct ClassifyArgs {
    pub config: Option<PathBuf>,
    pub names: Vec<String>,
    pub json: bool,
}

#[derive(Debug, Serialize)]
struct ClassifyRow {
    name: String,
    kind: Option<String>,
    role: Option<String>,
    token: Option<String>,
}

pub fn run(args: ClassifyArgs) -> anyhow::Result<()> {
    let (config_path, config) = super::load_config(args.config.as_deref())?;
    let classifier = config
        .classifier()
        .map_err(|e| HelpfulError::invalid_config(&config_path, e))?;

    let rows: Vec<ClassifyRow> = args
        .names
        .iter()
        .map(|arg| {
            // Accept full paths; only the file name is classified
            let name = Path::new(arg)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| arg.clone());
            let class = classifier.classify(&name);
            ClassifyRow {
                kind: class.as_ref().map(|c| c.kind.to_string()),
                role: class
                    .as_ref()
                    .map(|c| format!("{:?}", c.role).to_lowercase()),
                token: class.and_then(|c| c.token),
                name,
            }
        })
        .collect();

    if args.json {
        return print_json(&rows);
    }

    let dash = || "-".to_string();
    let table_rows = rows
        .into_iter()
        .map(|r| {
            vec![
                r.name,
                r.kind.unwrap_or_else(dash),
                r.role.unwrap_or_else(dash),
                r.token.unwrap_or_else(dash),
            ]
        })
        .collect();
    print_table(&["File", "Kind", "Role", "Token"], table_rows);
    Ok(())
}
