//! Command implementations for the Quiver CLI.
//!
//! Each invocation opens the registry over the data directory, runs one
//! command and flushes what it wrote, since buffered records only live in
//! memory.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, bail};
use serde::Serialize;

use crate::cli::args::*;
use crate::cli::output::output_result;
use crate::storage::Storage;
use crate::storage::file::FileStorage;
use crate::vector::core::distance::DistanceMetric;
use crate::vector::core::record::VectorRecord;
use crate::vector::engine::config::EngineConfig;
use crate::vector::engine::cursor::ListVectorsRequest;
use crate::vector::engine::registry::IndexRegistry;
use crate::vector::filter::FilterExpr;
use crate::vector::index::config::{BackendKind, BackendParams, IndexDescriptor};
use crate::vector::search::QueryRequest;

#[derive(Debug, Serialize)]
struct PutResult {
    index: String,
    records: usize,
    batches: usize,
    duration_ms: u64,
}

#[derive(Debug, Serialize)]
struct DeleteResult {
    index: String,
    requested: usize,
    deleted: usize,
}

#[derive(Debug, Serialize)]
struct FlushResult {
    index: String,
    segment: Option<u64>,
}

/// Execute a CLI command.
pub fn execute_command(args: QuiverArgs) -> anyhow::Result<()> {
    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => EngineConfig::default(),
    };
    let storage: Arc<dyn Storage> = Arc::new(
        FileStorage::new(&args.data_dir)
            .with_context(|| format!("opening data directory {}", args.data_dir.display()))?,
    );
    let registry = IndexRegistry::open(storage, config).context("opening indexes")?;

    let result = match &args.command {
        Command::CreateIndex(create) => create_index(&registry, create, &args),
        Command::DropIndex(target) => {
            registry.delete_index(&target.index)?;
            output_result("Index deleted", &serde_json::json!({ "index": target.index }), &args)?;
            Ok(())
        }
        Command::Indexes => {
            output_result("Indexes", &registry.list_indexes(), &args)?;
            Ok(())
        }
        Command::Put(put) => put_vectors(&registry, put, &args),
        Command::Query(query) => query_index(&registry, query, &args),
        Command::Get(get) => {
            let entries = registry.get_vectors(&get.index, &get.keys, get.include_vector, true)?;
            output_result("Vectors", &entries, &args)?;
            Ok(())
        }
        Command::Delete(delete) => {
            let deleted = registry.delete_vectors(&delete.index, &delete.keys)?;
            registry.flush(&delete.index)?;
            let result = DeleteResult {
                index: delete.index.clone(),
                requested: delete.keys.len(),
                deleted,
            };
            output_result("Vectors deleted", &result, &args)?;
            Ok(())
        }
        Command::List(list) => {
            let request = ListVectorsRequest {
                cursor: list.cursor.clone(),
                page_size: list.page_size,
                include_vector: list.include_vector,
                include_metadata: list.include_metadata,
                ..ListVectorsRequest::default()
            };
            output_result("Vectors", &registry.list_vectors(&list.index, &request)?, &args)?;
            Ok(())
        }
        Command::Flush(flush) => {
            let result = FlushResult {
                index: flush.index.clone(),
                segment: registry.flush(&flush.index)?,
            };
            output_result("Flushed", &result, &args)?;
            Ok(())
        }
        Command::Compact(compact) => {
            registry.flush(&compact.index)?;
            let outcome = registry.compact(&compact.index)?;
            let result = serde_json::json!({
                "index": compact.index,
                "segments_removed": outcome.segments_removed,
                "segment": outcome.segment,
                "records_kept": outcome.records_kept,
                "records_dropped": outcome.records_dropped,
            });
            output_result("Compacted", &result, &args)?;
            Ok(())
        }
        Command::Stats(stats) => {
            let index = registry.get_index(&stats.index)?;
            if stats.health {
                let result = serde_json::json!({
                    "stats": index.stats(),
                    "health": index.health(),
                });
                output_result("Index statistics", &result, &args)?;
            } else {
                output_result("Index statistics", &index.stats(), &args)?;
            }
            Ok(())
        }
    };

    // Let queued builds finish so their structures are persisted.
    registry.wait_idle(None);
    result
}

fn create_index(
    registry: &IndexRegistry,
    args: &CreateIndexArgs,
    cli_args: &QuiverArgs,
) -> anyhow::Result<()> {
    let metric = DistanceMetric::parse_str(&args.metric)?;
    let kind = BackendKind::parse_str(&args.backend)?;
    let params = args
        .params
        .as_deref()
        .map(serde_json::from_str::<serde_json::Value>)
        .transpose()
        .context("parsing --params")?;
    let backend = BackendParams::from_kind(kind, params)?;
    let descriptor = IndexDescriptor::new(args.dimension, metric, backend)
        .with_non_filterable_keys(args.non_filterable.iter().cloned());

    registry.create_index(&args.index, descriptor)?;
    let summary = registry
        .list_indexes()
        .into_iter()
        .find(|summary| summary.name == args.index);
    output_result("Index created", &summary, cli_args)?;
    Ok(())
}

fn put_vectors(
    registry: &IndexRegistry,
    args: &PutArgs,
    cli_args: &QuiverArgs,
) -> anyhow::Result<()> {
    if args.batch_size == 0 {
        bail!("--batch-size must be greater than zero");
    }
    let started = Instant::now();
    let file = File::open(&args.file).with_context(|| format!("opening {}", args.file.display()))?;
    let reader = BufReader::new(file);

    let mut batch = Vec::with_capacity(args.batch_size);
    let mut records = 0;
    let mut batches = 0;
    for (line_number, line) in reader.lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        let record: VectorRecord = serde_json::from_str(&line).with_context(|| {
            format!("{}:{}: invalid record", args.file.display(), line_number + 1)
        })?;
        batch.push(record);
        if batch.len() == args.batch_size {
            records += batch.len();
            batches += 1;
            registry.put_vectors(&args.index, std::mem::take(&mut batch))?;
        }
    }
    if !batch.is_empty() {
        records += batch.len();
        batches += 1;
        registry.put_vectors(&args.index, batch)?;
    }
    registry.flush(&args.index)?;

    let result = PutResult {
        index: args.index.clone(),
        records,
        batches,
        duration_ms: started.elapsed().as_millis() as u64,
    };
    output_result("Vectors written", &result, cli_args)?;
    Ok(())
}

fn query_index(
    registry: &IndexRegistry,
    args: &QueryArgs,
    cli_args: &QuiverArgs,
) -> anyhow::Result<()> {
    let vector = parse_vector(&args.vector)?;
    let mut request = QueryRequest::new(vector, args.k)
        .with_vectors(args.include_vector)
        .with_metadata(!args.no_metadata);
    if let Some(filter) = &args.filter {
        request = request.with_filter(FilterExpr::from_json(filter)?);
    }

    let response = registry.query(&args.index, &request)?;
    output_result("Results", &response, cli_args)?;
    Ok(())
}

/// Parse `[1, 2.5]` or `1,2.5`.
pub fn parse_vector(text: &str) -> anyhow::Result<Vec<f32>> {
    let text = text.trim();
    if text.starts_with('[') {
        return serde_json::from_str(text).context("parsing query vector");
    }
    text.split(',')
        .map(|part| {
            part.trim()
                .parse::<f32>()
                .with_context(|| format!("invalid vector component {part:?}"))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn test_parse_vector() {
        assert_eq!(parse_vector("[1, 2.5]").unwrap(), vec![1.0, 2.5]);
        assert_eq!(parse_vector(" -1,0.5 ").unwrap(), vec![-1.0, 0.5]);
        assert!(parse_vector("1,x").is_err());
    }

    #[test]
    fn test_commands_over_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let records = dir.path().join("records.jsonl");
        std::fs::write(
            &records,
            concat!(
                r#"{"key":"a","vector":[0,0],"metadata":{"tag":"x"}}"#,
                "\n",
                r#"{"key":"b","vector":[1,1]}"#,
                "\n"
            ),
        )
        .unwrap();
        let data_dir = dir.path().join("data");
        let run = |extra: &[&str]| {
            let data_dir = data_dir.to_str().unwrap();
            let mut argv = vec!["quiver", "-q", "-f", "json", "--data-dir", data_dir];
            argv.extend_from_slice(extra);
            execute_command(QuiverArgs::try_parse_from(argv).unwrap())
        };

        run(&["create-index", "docs", "--dimension", "2"]).unwrap();
        run(&["put", "docs", records.to_str().unwrap()]).unwrap();
        run(&["query", "docs", "0,0", "-k", "1"]).unwrap();
        run(&["delete", "docs", "a"]).unwrap();

        let storage: Arc<dyn Storage> = Arc::new(FileStorage::new(&data_dir).unwrap());
        let registry = IndexRegistry::open(storage, EngineConfig::inline()).unwrap();
        assert_eq!(registry.stats("docs").unwrap().vector_count, 1);
        assert!(run(&["query", "missing", "0,0"]).is_err());
    }
}
