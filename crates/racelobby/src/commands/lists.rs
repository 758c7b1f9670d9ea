//! Lists subcommand handlers.

use std::path::PathBuf;

use serde::Serialize;
use tabled::Tabled;

use racelobby_config::Config;
use racelobby_core::{FileSource, ServerId, SourceIdentity};

use crate::cli::{GlobalOpts, ListsArgs, ListsCommand};
use crate::commands::{SourceSet, build_manager};
use crate::error::CliError;
use crate::output;

// ── Views ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct ListView {
    key: String,
    label: String,
    color: Option<String>,
    hidden: bool,
    excluded: bool,
    servers: usize,
    exists: bool,
    path: PathBuf,
}

impl ListView {
    fn from_source(list: &FileSource) -> Self {
        let info = list.information();
        Self {
            key: list.key().to_owned(),
            label: list.display_name(),
            color: info.color.map(|c| c.to_string()),
            hidden: info.hidden,
            excluded: info.excluded,
            servers: list.records().len(),
            exists: list.exists(),
            path: list.path().to_path_buf(),
        }
    }
}

#[derive(Tabled)]
struct ListRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Label")]
    label: String,
    #[tabled(rename = "Color")]
    color: String,
    #[tabled(rename = "Flags")]
    flags: String,
    #[tabled(rename = "Servers")]
    servers: usize,
}

impl From<&ListView> for ListRow {
    fn from(v: &ListView) -> Self {
        let flags: Vec<&str> = [(v.hidden, "hidden"), (v.excluded, "excluded")]
            .into_iter()
            .filter_map(|(set, name)| set.then_some(name))
            .collect();
        Self {
            key: v.key.clone(),
            label: v.label.clone(),
            color: v.color.clone().unwrap_or_default(),
            flags: flags.join(", "),
            servers: v.servers,
        }
    }
}

#[derive(Debug, Serialize)]
struct RecordView {
    id: String,
    name: Option<String>,
}

#[derive(Tabled)]
struct RecordRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "Name")]
    name: String,
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: ListsArgs, config: &Config, global: &GlobalOpts) -> Result<(), CliError> {
    // File lists need no network source.
    let manager = build_manager(
        config,
        SourceSet {
            lobby: false,
            lan: false,
        },
    )?;
    let lists = manager.attach_lists(config.lists_dir(), false).await?;

    let result = match args.command {
        ListsCommand::Show { list: None } => {
            let views: Vec<ListView> = lists.lists().iter().map(|l| ListView::from_source(l)).collect();
            let out = output::render_list(global.output, &views, |v| ListRow::from(v), |v| v.key.clone())?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ListsCommand::Show { list: Some(key) } => {
            let list = lists.get(&key.to_lowercase()).ok_or_else(|| CliError::NotFound {
                resource_type: "list".into(),
                identifier: key.clone(),
                list_command: "lists show".into(),
            })?;
            let views: Vec<RecordView> = list
                .records()
                .into_iter()
                .map(|r| RecordView {
                    id: r.id.to_string(),
                    name: r.display_name,
                })
                .collect();
            let out = output::render_list(
                global.output,
                &views,
                |v| RecordRow {
                    id: v.id.clone(),
                    name: v.name.clone().unwrap_or_default(),
                },
                |v| v.id.clone(),
            )?;
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ListsCommand::Add { list, server, name } => {
            let id = parse_id(&server)?;
            let added = manager.add_to_list(&list, id.clone(), name).await?;
            let message = if added {
                format!("Added {id} to {list}")
            } else {
                format!("{id} is already in {list}")
            };
            output::print_output(&message, global.quiet);
            Ok(())
        }

        ListsCommand::Remove { list, server } => {
            let id = parse_id(&server)?;
            if !manager.remove_from_list(&list, &id).await? {
                return Err(CliError::NotFound {
                    resource_type: "server".into(),
                    identifier: id.to_string(),
                    list_command: format!("lists show {list}"),
                });
            }
            output::print_output(&format!("Removed {id} from {list}"), global.quiet);
            Ok(())
        }
    };

    manager.shutdown().await;
    result
}

fn parse_id(raw: &str) -> Result<ServerId, CliError> {
    let id = ServerId::new(raw);
    if id.is_empty() || id.as_str().contains(';') {
        return Err(CliError::Validation {
            field: "server".into(),
            reason: format!("'{raw}' is not a usable server id"),
        });
    }
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_normalised() {
        assert!(matches!(parse_id(" 10.0.0.1:8081 "), Ok(id) if id.as_str() == "10.0.0.1:8081"));
    }

    #[test]
    fn separator_in_id_is_rejected() {
        assert!(parse_id("a;b").is_err());
        assert!(parse_id("   ").is_err());
    }
}
