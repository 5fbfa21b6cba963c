//! Ollama auto-discovery helpers.
//!
//! Pings the configured Ollama endpoint and, if responsive, fetches the list
//! of locally downloaded models from `/api/tags`.

use serde::Deserialize;

/// A single model entry returned by Ollama's `/api/tags` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct OllamaModel {
    pub name: String,
}

/// Raw shape of the `/api/tags` JSON response.
#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<OllamaModel>,
}

/// Ping the Ollama server and return the list of available models.
pub fn fetch_models(base_url: &str) -> Result<Vec<OllamaModel>, String> {
    let url = format!("{}/api/tags", base_url.trim_end_matches('/'));
    let response = reqwest::blocking::get(&url).map_err(|e| format!("Ollama unreachable at {}: {}", url, e))?;

    if !response.status().is_success() {
        return Err(format!("Ollama returned HTTP {}", response.status()));
    }

    let tags: TagsResponse = response
        .json()
        .map_err(|e| format!("Failed to parse Ollama response: {}", e))?;

    Ok(tags.models)
}

/// Configured model names that are not among `available`.
///
/// Ollama reports `name:tag`; a configured name without a tag matches
/// `name:latest`.
pub fn missing_models<'a>(wanted: &[&'a str], available: &[OllamaModel]) -> Vec<&'a str> {
    wanted
        .iter()
        .copied()
        .filter(|w| {
            !available
                .iter()
                .any(|m| m.name == *w || (!w.contains(':') && m.name == format!("{w}:latest")))
        })
        .collect()
}
