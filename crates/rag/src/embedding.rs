use anyhow::{anyhow, Result};
use reqwest::blocking::Client;
use serde::Deserialize;
use std::env;

use claimlens_core::{HashEmbedder, HashEmbedderConfig};

#[derive(Clone)]
pub enum EmbeddingBackend {
    Hash(HashEmbedder),
    OpenAi(OpenAiEmbeddingClient),
}

/// Deterministic text-to-vector function owned by the record store.
#[derive(Clone)]
pub struct EmbeddingClient {
    backend: EmbeddingBackend,
}

impl EmbeddingClient {
    pub fn from_env() -> Result<Self> {
        match env::var("EMBEDDING_PROVIDER")
            .unwrap_or_else(|_| "hash".to_string())
            .to_lowercase()
            .as_str()
        {
            "openai" => {
                let model = env::var("EMBEDDING_MODEL")
                    .unwrap_or_else(|_| "text-embedding-3-small".to_string());
                Ok(Self {
                    backend: EmbeddingBackend::OpenAi(OpenAiEmbeddingClient::new(&model)?),
                })
            }
            _ => {
                let dims = env::var("HASH_EMBED_DIMENSIONS")
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(64);
                Ok(Self {
                    backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig {
                        dimensions: dims,
                        seed: 1337,
                    })),
                })
            }
        }
    }

    pub fn hash() -> Self {
        Self {
            backend: EmbeddingBackend::Hash(HashEmbedder::new(HashEmbedderConfig::default())),
        }
    }

    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        match &self.backend {
            EmbeddingBackend::Hash(embedder) => Ok(embedder.embed_text(text)),
            EmbeddingBackend::OpenAi(client) => {
                let mut output = client.embed_batch(&[text.to_string()])?;
                output
                    .pop()
                    .ok_or_else(|| anyhow!("embedding service returned no vector"))
            }
        }
    }
}

#[derive(Clone)]
pub struct OpenAiEmbeddingClient {
    http: Client,
    model: String,
    api_key: String,
}

impl OpenAiEmbeddingClient {
    pub fn new(model: &str) -> Result<Self> {
        let api_key = env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow!("OPENAI_API_KEY is required for openai embeddings"))?;
        Ok(Self {
            http: Client::new(),
            model: model.to_string(),
            api_key,
        })
    }

    pub fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }
        let payload = serde_json::json!({
            "model": self.model,
            "input": inputs,
        });
        let response = self
            .http
            .post("https://api.openai.com/v1/embeddings")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()?;
        if !response.status().is_success() {
            return Err(anyhow!(
                "openai embeddings request failed: {}",
                response.status()
            ));
        }
        let parsed: OpenAiEmbeddingResponse = response.json()?;
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[derive(Deserialize)]
struct OpenAiEmbeddingResponse {
    data: Vec<OpenAiEmbeddingData>,
}

#[derive(Deserialize)]
struct OpenAiEmbeddingData {
    embedding: Vec<f32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_backend_is_deterministic() {
        let client = EmbeddingClient::hash();
        assert_eq!(
            client.embed("taxi to airport").unwrap(),
            client.embed("taxi to airport").unwrap()
        );
    }

    #[test]
    fn openai_backend_without_key_is_a_hard_error() {
        // A misconfigured provider must surface at construction, not degrade
        // to hash embeddings with a different dimensionality.
        env::set_var("EMBEDDING_PROVIDER", "openai");
        env::remove_var("OPENAI_API_KEY");
        let result = EmbeddingClient::from_env();
        env::remove_var("EMBEDDING_PROVIDER");
        assert!(result.is_err());
    }
}
