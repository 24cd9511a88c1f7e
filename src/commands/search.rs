use std::io::{self, Write};

use anyhow::{Context, Result, bail};
use serde::Serialize;
use tracing::info;

use crate::cli::SearchArgs;
use crate::index::{INDEX_FILE_NAME, SearchHit, VectorIndex};
use crate::model::ContentType;

use super::backends::build_embedder;

#[derive(Debug, Serialize)]
struct SearchResponse<'a> {
    query: &'a str,
    index: String,
    k: usize,
    mixed: bool,
    content_type: Option<ContentType>,
    document_id: Option<&'a str>,
    returned: usize,
    results: Vec<SearchResult<'a>>,
}

#[derive(Debug, Serialize)]
struct SearchResult<'a> {
    rank: usize,
    score: f64,
    id: &'a str,
    fragment: &'a str,
    content_type: ContentType,
    content: &'a str,
}

pub fn run(args: SearchArgs) -> Result<()> {
    let index_dir = match &args.vector_id {
        Some(vector_id) => args.data.vec_root().join(vector_id),
        None => args.data.shared_index_dir(),
    };
    if !index_dir.join(INDEX_FILE_NAME).is_file() {
        bail!("no vector index at {}", index_dir.display());
    }
    if args.mixed && (args.content_type.is_some() || args.document.is_some()) {
        bail!("--mixed cannot be combined with --type or --document");
    }

    let embedder = build_embedder(&args.embedding, &args.retry)?;
    let index = VectorIndex::open(&index_dir, embedder.as_ref())?
        .with_timeout_ms(args.search_timeout_ms);

    let content_type = args.content_type.map(ContentType::from);
    let hits = if args.mixed {
        index.search_mixed(&args.query, args.k)?
    } else {
        index.search(&args.query, args.k, content_type, args.document.as_deref())?
    };
    info!(index = %index_dir.display(), returned = hits.len(), "search completed");

    if args.json {
        let response = SearchResponse {
            query: &args.query,
            index: index_dir.display().to_string(),
            k: args.k,
            mixed: args.mixed,
            content_type,
            document_id: args.document.as_deref(),
            returned: hits.len(),
            results: hits.iter().enumerate().map(search_result).collect(),
        };
        let mut output = io::BufWriter::new(io::stdout().lock());
        serde_json::to_writer_pretty(&mut output, &response)
            .context("failed to serialize search json output")?;
        writeln!(output)?;
        output.flush()?;
        return Ok(());
    }

    let mut output = io::BufWriter::new(io::stdout().lock());
    writeln!(output, "Query: {}", args.query)?;
    writeln!(output, "Results: {}", hits.len())?;
    for (rank, hit) in hits.iter().enumerate() {
        writeln!(
            output,
            "{}.\t{}\t{}\t{}\tscore={:.6}",
            rank + 1,
            hit.chunk.document_id,
            hit.chunk.fragment,
            hit.chunk.content_type.as_str(),
            hit.score
        )?;
        for line in hit.chunk.content.lines() {
            writeln!(output, "\t{line}")?;
        }
    }
    output.flush()?;
    Ok(())
}

fn search_result((rank, hit): (usize, &SearchHit)) -> SearchResult<'_> {
    SearchResult {
        rank: rank + 1,
        score: hit.score,
        id: &hit.chunk.document_id,
        fragment: &hit.chunk.fragment,
        content_type: hit.chunk.content_type,
        content: &hit.chunk.content,
    }
}
