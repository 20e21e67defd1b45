//! Run-scoped content cache that replaces repeated context blocks with short
//! reference tokens.

use std::collections::HashMap;
use std::sync::LazyLock;

use anyhow::{Result, anyhow, bail};
use regex::Regex;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// Number of hex characters of the fingerprint used in reference tokens.
pub const REF_HEX_LEN: usize = 16;

static REF_TOKEN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\[dialectic-ref:([0-9a-f]{16})\]\]").expect("reference token regex")
});

/// Canonical form used for fingerprinting: LF line endings, no trailing
/// whitespace per line, no outer whitespace.
pub fn normalize(content: &str) -> String {
    content
        .replace("\r\n", "\n")
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

/// SHA-256 over the normalised content, hex encoded.
pub fn fingerprint(content: &str) -> String {
    hex::encode(Sha256::digest(normalize(content).as_bytes()))
}

/// Opening of every reference token.
pub const REF_PREFIX: &str = "[[dialectic-ref:";

pub fn reference_token(fingerprint: &str) -> String {
    let short = &fingerprint[..REF_HEX_LEN.min(fingerprint.len())];
    format!("{REF_PREFIX}{short}]]")
}

/// Drop a reference token left incomplete at the end of `text`.
pub fn clip_partial_reference(text: &str) -> &str {
    let Some(start) = text.rfind("[[") else {
        return text;
    };
    let tail = &text[start..];
    let is_token_start = REF_PREFIX.starts_with(tail) || tail.starts_with(REF_PREFIX);
    if is_token_start && !tail.contains("]]") {
        &text[..start]
    } else {
        text
    }
}

/// First-seen content for a fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub fingerprint: String,
    pub label: String,
    pub content: String,
}

/// Blocks are staged by [`ContextCache::encode`] and only become referenceable
/// once [`ContextCache::commit`] sees them intact in a delivered payload.
#[derive(Debug, Default)]
pub struct ContextCache {
    enabled: bool,
    entries: HashMap<String, CacheEntry>,
    staged: HashMap<String, CacheEntry>,
    pub hits: u64,
    pub misses: u64,
}

impl ContextCache {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled,
            ..Self::default()
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return a reference token when an equivalent block was delivered by an
    /// earlier payload, otherwise stage `content` and return it unchanged.
    /// Disabled caches pass content through.
    pub fn encode(&mut self, label: &str, content: &str) -> String {
        if !self.enabled || normalize(content).is_empty() {
            return content.to_string();
        }
        let full = fingerprint(content);
        let key = full[..REF_HEX_LEN].to_string();
        if self.entries.contains_key(&key) {
            self.hits += 1;
            return reference_token(&full);
        }
        self.misses += 1;
        self.staged.entry(key).or_insert_with(|| CacheEntry {
            fingerprint: full,
            label: label.to_string(),
            content: content.to_string(),
        });
        content.to_string()
    }

    /// Promote staged blocks whose full text survived into `payload`. Blocks
    /// dropped or cut by the prompt budget are forgotten. Returns how many
    /// entries were committed.
    pub fn commit(&mut self, payload: &str) -> usize {
        let mut committed = 0;
        for (key, entry) in self.staged.drain() {
            if payload.contains(entry.content.trim()) {
                self.entries.insert(key, entry);
                committed += 1;
            }
        }
        committed
    }

    /// Expand every reference token in `payload` back into stored content.
    pub fn resolve(&self, payload: &str) -> Result<String> {
        let mut unknown = None;
        let resolved = REF_TOKEN.replace_all(payload, |caps: &regex::Captures<'_>| {
            match self.entries.get(&caps[1]) {
                Some(entry) => entry.content.clone(),
                None => {
                    unknown.get_or_insert_with(|| caps[1].to_string());
                    caps[0].to_string()
                }
            }
        });
        if let Some(key) = unknown {
            return Err(anyhow!("unknown cache reference {key}"));
        }
        Ok(resolved.into_owned())
    }

    pub fn entry(&self, token_or_key: &str) -> Option<&CacheEntry> {
        let key = REF_TOKEN
            .captures(token_or_key)
            .and_then(|caps| caps.get(1))
            .map_or(token_or_key, |m| m.as_str());
        self.entries.get(key)
    }
}

/// Refuse to enable the cache for a backend that cannot expand reference tokens.
pub fn ensure_compatible(cache_enabled: bool, backend_resolves_references: bool) -> Result<()> {
    if cache_enabled && !backend_resolves_references {
        bail!(
            "context cache is enabled but the configured backend does not resolve cache references; \
             disable [context].cache or use a backend that supports them"
        );
    }
    Ok(())
}
