use anyhow::{Context, Result};
use tracing::info;

use crate::backend::{
    ChatDecider, Embedder, FieldDecider, HttpEmbedder, LocalHashEmbedder, Retrying,
};
use crate::cli::{DeciderArgs, EmbeddingArgs, EmbeddingBackend, RetryArgs};

pub(super) fn build_embedder(args: &EmbeddingArgs, retry: &RetryArgs) -> Result<Box<dyn Embedder>> {
    let embedder: Box<dyn Embedder> = match args.embedding_backend {
        EmbeddingBackend::Local => Box::new(LocalHashEmbedder::new(args.embedding_dim)),
        EmbeddingBackend::Http => {
            let api_key = args.embedding_key.as_deref().context(
                "--embedding-key or CONVOCATORIAS_EMBEDDING_KEY is required for the http embedding backend",
            )?;
            let http = HttpEmbedder::new(
                &args.embedding_url,
                api_key,
                &args.embedding_model,
                args.embedding_dim,
                retry.request_timeout(),
            )?;
            Box::new(Retrying::new(http, retry.policy()))
        }
    };

    let model = embedder.model();
    info!(
        model_id = %model.model_id,
        backend = %model.backend,
        dimensions = model.dimensions,
        "embedding backend ready"
    );
    Ok(embedder)
}

pub(super) fn build_decider(args: &DeciderArgs, retry: &RetryArgs) -> Result<Box<dyn FieldDecider>> {
    let api_key = args
        .llm_key
        .as_deref()
        .context("--llm-key or CONVOCATORIAS_LLM_KEY is required to refine drafts")?;
    let chat = ChatDecider::new(
        &args.llm_url,
        api_key,
        &args.llm_model,
        retry.request_timeout(),
    )?;

    info!(model = %args.llm_model, "decision backend ready");
    Ok(Box::new(Retrying::new(chat, retry.policy())))
}
