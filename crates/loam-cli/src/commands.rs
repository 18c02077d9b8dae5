use std::sync::Arc;

use anyhow::Context;
use colored::Colorize;
use loam_kernel::{
    BatchLoadRequest, BlockLookupRequest, Kernel, KernelConfig, LoadTreeRequest, PathLookupRequest, TypedRequest,
    WorkspaceDescriptor,
};
use loam_types::{BlockTreeEntry, JsonTreeCodec, TreeCodec};
use serde_json::{json, Value};

use crate::cli::*;

/// What a command produced, in both output formats.
#[derive(Debug)]
pub struct Output {
    pub text: String,
    pub json: Value,
}

impl Output {
    fn new(text: impl Into<String>, json: Value) -> Self {
        Self {
            text: text.into(),
            json,
        }
    }
}

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let config = kernel_config(&cli)?;
    let kernel = Kernel::new(config);
    let ws = kernel.resolve(None)?;
    ws.ensure_dirs()
        .with_context(|| format!("preparing workspace {}", ws.root().display()))?;

    let result = execute(&kernel, &ws, cli.command);
    kernel.shutdown()?;
    let output = result.map_err(|e| match e.downcast::<loam_kernel::KernelError>() {
        Ok(kernel_err) => anyhow::anyhow!(kernel_err.user_message()),
        Err(other) => other,
    })?;

    match cli.format {
        OutputFormat::Text => println!("{}", output.text),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&output.json)?),
    }
    Ok(())
}

/// The kernel configuration: the `--config` file (or defaults) with
/// `--workspace` applied on top.
pub fn kernel_config(cli: &Cli) -> anyhow::Result<KernelConfig> {
    let mut config = match &cli.config {
        Some(path) => KernelConfig::load(path)?,
        None => KernelConfig::default(),
    };
    if let Some(root) = &cli.workspace {
        config.workspace.root = root.clone();
    }
    Ok(config)
}

pub fn execute(kernel: &Kernel, ws: &Arc<WorkspaceDescriptor>, command: Command) -> anyhow::Result<Output> {
    match command {
        Command::Get(args) => cmd_get(kernel, ws, args),
        Command::Content(args) => cmd_content(kernel, ws, args),
        Command::Refs(args) => cmd_refs(kernel, ws, args),
        Command::ByPath(args) => cmd_lookup(kernel, ws, json!({ "box": args.box_id, "path": args.path })),
        Command::ByHpath(args) => cmd_lookup(kernel, ws, json!({ "box": args.box_id, "hpath": args.path })),
        Command::Load(args) => cmd_load(kernel, ws, args),
        Command::Batch(args) => cmd_batch(kernel, ws, args),
        Command::Reindex => cmd_reindex(kernel, ws),
        Command::Stats => cmd_stats(kernel),
        Command::ClearCache => {
            let cleared = kernel.clear_tenant_cache(ws.key())?;
            let text = if cleared {
                format!("{} Cleared caches of {}", "✓".green().bold(), ws.key())
            } else {
                format!("No caches held for {}", ws.key())
            };
            Ok(Output::new(text, json!({ "cleared": cleared })))
        }
        Command::Config => {
            let text = kernel.config().to_toml_string()?;
            Ok(Output::new(text, serde_json::to_value(kernel.config())?))
        }
    }
}

fn entry_text(entry: &BlockTreeEntry) -> String {
    format!(
        "{}  {}\n  box:    {}\n  path:   {}\n  hpath:  {}\n  root:   {}\n  parent: {}\n  updated: {}",
        entry.id.yellow().bold(),
        entry.block_type.to_string().cyan(),
        entry.box_id,
        entry.path,
        entry.hpath.bold(),
        entry.root_id,
        if entry.parent_id.is_empty() { "-" } else { entry.parent_id.as_str() },
        entry.updated.dimmed(),
    )
}

fn cmd_get(kernel: &Kernel, ws: &Arc<WorkspaceDescriptor>, args: IdArgs) -> anyhow::Result<Output> {
    let req = BlockLookupRequest::from_value(json!({ "id": args.id }))?;
    let entry = kernel.get_block_tree(ws, req.id.as_str())?;
    Ok(Output::new(entry_text(&entry), serde_json::to_value(&entry)?))
}

fn cmd_content(kernel: &Kernel, ws: &Arc<WorkspaceDescriptor>, args: IdArgs) -> anyhow::Result<Output> {
    let req = BlockLookupRequest::from_value(json!({ "id": args.id }))?;
    let block = kernel.block_content(ws, req.id.as_str())?;
    let text = format!("{} ({})\n{}", block.id.yellow(), block.path.dimmed(), block.content);
    Ok(Output::new(text, serde_json::to_value(&*block)?))
}

fn cmd_refs(kernel: &Kernel, ws: &Arc<WorkspaceDescriptor>, args: IdArgs) -> anyhow::Result<Output> {
    let req = BlockLookupRequest::from_value(json!({ "id": args.id }))?;
    let refs = kernel.references_to(ws, req.id.as_str())?;
    let text = if refs.is_empty() {
        format!("No references to {}", req.id.to_string().yellow())
    } else {
        let mut lines = vec![format!("{} reference(s) to {}", refs.len(), req.id.to_string().yellow())];
        for r in refs.values() {
            lines.push(format!("  {} {} \"{}\"", r.block_id, r.path.dimmed(), r.content));
        }
        lines.join("\n")
    };
    let list: Vec<_> = refs.values().collect();
    Ok(Output::new(text, serde_json::to_value(list)?))
}

fn cmd_lookup(kernel: &Kernel, ws: &Arc<WorkspaceDescriptor>, raw: Value) -> anyhow::Result<Output> {
    let req = PathLookupRequest::from_value(raw)?;
    let entry = kernel.lookup_path(ws, &req)?;
    Ok(Output::new(entry_text(&entry), serde_json::to_value(&entry)?))
}

fn cmd_load(kernel: &Kernel, ws: &Arc<WorkspaceDescriptor>, args: LocationArgs) -> anyhow::Result<Output> {
    let req = LoadTreeRequest::from_value(json!({ "box": args.box_id, "path": args.path }))?;
    let tree = kernel.load(ws, &req)?;
    let blocks = tree.block_entries().len();
    let text = format!(
        "{}  {}\n  hpath:  {}\n  blocks: {}",
        tree.id.to_string().yellow().bold(),
        tree.title().bold(),
        tree.hpath,
        blocks
    );
    let rendered = JsonTreeCodec.render(&tree, false)?;
    let json = json!({
        "id": tree.id.to_string(),
        "box": tree.box_id.to_string(),
        "path": tree.path.to_string(),
        "hpath": tree.hpath,
        "blocks": blocks,
        "root": serde_json::from_slice::<Value>(&rendered)?,
    });
    Ok(Output::new(text, json))
}

fn cmd_batch(kernel: &Kernel, ws: &Arc<WorkspaceDescriptor>, args: BatchArgs) -> anyhow::Result<Output> {
    let req = BatchLoadRequest::from_value(json!({ "ids": args.ids }))?;
    let batch = kernel.load_trees_batch(ws, &req.id_strings())?;

    let mut lines = Vec::new();
    let mut loaded = serde_json::Map::new();
    for id in req.id_strings() {
        if let Some(tree) = batch.trees.get(&id) {
            lines.push(format!("  {} {} {}", "✓".green(), id, tree.hpath.dimmed()));
            loaded.insert(id, json!({ "root": tree.id.to_string(), "hpath": tree.hpath }));
        }
    }
    for id in &batch.missing {
        lines.push(format!("  {} {} not indexed", "?".yellow(), id));
    }
    for failure in &batch.failures {
        lines.push(format!("  {} {}{}: {}", "✗".red(), failure.box_id, failure.path, failure.error));
    }
    let json = json!({
        "loaded": loaded,
        "missing": batch.missing,
        "failures": batch.failures,
    });
    Ok(Output::new(lines.join("\n"), json))
}

fn cmd_reindex(kernel: &Kernel, ws: &Arc<WorkspaceDescriptor>) -> anyhow::Result<Output> {
    let report = kernel.rebuild_index(ws)?;
    let mut text = format!(
        "{} Indexed {} documents ({} blocks) in {} ms",
        "✓".green().bold(),
        report.documents,
        report.blocks,
        report.elapsed_ms
    );
    for failure in &report.failures {
        text.push_str(&format!("\n  {} {}{}: {}", "✗".red(), failure.box_id, failure.path, failure.error));
    }
    Ok(Output::new(text, serde_json::to_value(&report)?))
}

fn cmd_stats(kernel: &Kernel) -> anyhow::Result<Output> {
    let pool = kernel.pool_stats()?;
    let caches = kernel.cache_stats()?;
    let mut lines = vec![format!(
        "Index handles: {}/{} (idle timeout {}s)",
        pool.total.to_string().bold(),
        pool.max_handles,
        pool.idle_timeout_secs
    )];
    for h in &pool.handles {
        lines.push(format!(
            "  {} idle {}s, {} accesses{}",
            h.key,
            h.idle_secs,
            h.access_count,
            if h.borrowed { " (in use)" } else { "" }
        ));
    }
    lines.push(format!("Tenant caches: {}/{}", caches.total.to_string().bold(), caches.max_tenants));
    for (key, s) in &caches.tenants {
        lines.push(format!(
            "  {} {} blocks (cost {}), {} ref sets, {} hits / {} misses{}",
            key,
            s.blocks,
            s.block_cost,
            s.ref_sets,
            s.hits,
            s.misses,
            if s.enabled { "" } else { " (disabled)" }
        ));
    }
    let json = json!({ "pool": pool, "caches": caches });
    Ok(Output::new(lines.join("\n"), json))
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use clap::Parser;

    use super::*;

    fn setup(dir: &tempfile::TempDir) -> (Kernel, Arc<WorkspaceDescriptor>) {
        let cli = Cli::try_parse_from(["loam", "-w", dir.path().to_str().unwrap(), "stats"]).unwrap();
        let kernel = Kernel::new(kernel_config(&cli).unwrap());
        let ws = kernel.resolve(None).unwrap();
        ws.ensure_dirs().unwrap();
        (kernel, ws)
    }

    fn parse(args: &[&str]) -> Command {
        let mut argv = vec!["loam"];
        argv.extend_from_slice(args);
        Cli::try_parse_from(argv).unwrap().command
    }

    #[test]
    fn workspace_flag_overrides_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("loam.toml");
        std::fs::write(&file, "[workspace]\nroot = \"/from/file\"\nreindex_on_boot = false\n").unwrap();
        let path = file.to_str().unwrap();

        let cli = Cli::try_parse_from(["loam", "-c", path, "stats"]).unwrap();
        let config = kernel_config(&cli).unwrap();
        assert_eq!(config.workspace.root, PathBuf::from("/from/file"));
        assert!(!config.workspace.reindex_on_boot);

        let cli = Cli::try_parse_from(["loam", "-c", path, "-w", "/override", "stats"]).unwrap();
        let config = kernel_config(&cli).unwrap();
        assert_eq!(config.workspace.root, PathBuf::from("/override"));
        assert!(!config.workspace.reindex_on_boot);
    }

    #[test]
    fn missing_config_file_is_an_error() {
        let cli = Cli::try_parse_from(["loam", "-c", "/no/such/loam.toml", "stats"]).unwrap();
        assert!(kernel_config(&cli).is_err());
    }

    #[test]
    fn reindex_then_stats_on_empty_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = setup(&dir);
        let out = execute(&kernel, &ws, Command::Reindex).unwrap();
        assert_eq!(out.json["documents"], 0);

        let out = execute(&kernel, &ws, Command::Stats).unwrap();
        assert_eq!(out.json["pool"]["total"], 1);
        assert!(out.text.contains("Index handles"));
    }

    #[test]
    fn unknown_block_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = setup(&dir);
        let err = execute(&kernel, &ws, parse(&["get", "20240101000000-aaaaaaa"])).unwrap_err();
        let err = err.downcast::<loam_kernel::KernelError>().unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn malformed_ids_are_rejected_before_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = setup(&dir);
        let err = execute(&kernel, &ws, parse(&["get", "not an id"])).unwrap_err();
        assert!(err.to_string().contains("invalid request"), "{err}");
        assert!(execute(&kernel, &ws, parse(&["load", "--box", "bad box", "/a.sy"])).is_err());
    }

    #[test]
    fn clear_cache_reports_missing_tenant() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = setup(&dir);
        let out = execute(&kernel, &ws, Command::ClearCache).unwrap();
        assert_eq!(out.json["cleared"], false);
        execute(&kernel, &ws, Command::Reindex).unwrap();
        let out = execute(&kernel, &ws, Command::ClearCache).unwrap();
        assert_eq!(out.json["cleared"], true);
    }

    #[test]
    fn config_command_prints_toml() {
        let dir = tempfile::tempdir().unwrap();
        let (kernel, ws) = setup(&dir);
        let out = execute(&kernel, &ws, Command::Config).unwrap();
        assert!(out.text.contains("[pool]"));
        assert_eq!(out.json["loader"]["max_workers"], 8);
    }
}
