// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

//! Static telecom protocol knowledge: standards, procedure templates, error
//! code dictionaries and vendor extensions.
//!
//! The knowledge base is read-only after [`KnowledgeBase::load`]; a config
//! reload builds a fresh instance off the hot path and swaps the shared
//! `Arc`. Lookups on the decode path are plain map reads.

pub mod error_codes;
pub mod procedures;
pub mod standards;

use std::{collections::HashMap, fs, path::Path};

use serde::Deserialize;
use serde_json::{Value, json};
use thiserror::Error;

pub use crate::kb::{
    error_codes::ErrorCodeEntry,
    procedures::{ProcStep, ProcVariant, ProcedureTemplate},
    standards::{Standard, VendorExtension},
};
use crate::models::message::Protocol;

/// Raised when the knowledge dataset cannot be loaded. Fatal only during the
/// initial load; a hot reload rejects the new dataset and keeps the old one.
#[derive(Debug, Error)]
pub enum KbError {
    #[error("failed to read dataset {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed dataset {path}: {source}")]
    Malformed {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Optional YAML supplement merged over the embedded dataset.
#[derive(Debug, Default, Deserialize)]
struct Supplement {
    #[serde(default)]
    error_codes: Vec<ErrorCodeEntry>,
    #[serde(default)]
    procedures: Vec<ProcedureTemplate>,
}

/// In-memory catalog with lookup maps and a substring search index.
#[derive(Debug)]
pub struct KnowledgeBase {
    standards: HashMap<String, Standard>,
    error_codes: HashMap<(Protocol, u32), ErrorCodeEntry>,
    procedures_by_protocol: HashMap<Protocol, Vec<ProcedureTemplate>>,
    procedures_by_name: HashMap<String, ProcedureTemplate>,
    vendor_extensions: HashMap<String, Vec<VendorExtension>>,
    /// (lowercase haystack, rendered entry) pairs for substring search.
    search_index: Vec<(String, Value)>,
}

impl KnowledgeBase {
    /// Builds the catalog from the embedded dataset plus an optional YAML
    /// supplement file.
    pub fn load(supplement_path: Option<&Path>) -> Result<Self, KbError> {
        let mut codes = error_codes::builtin_error_codes();
        let mut procedures = procedures::builtin_procedures();

        if let Some(path) = supplement_path {
            let sup = read_supplement(path)?;
            codes.extend(sup.error_codes);
            procedures.extend(sup.procedures);
        }

        let mut kb = Self {
            standards: HashMap::new(),
            error_codes: HashMap::new(),
            procedures_by_protocol: HashMap::new(),
            procedures_by_name: HashMap::new(),
            vendor_extensions: HashMap::new(),
            search_index: Vec::new(),
        };

        for std_doc in standards::builtin_standards() {
            kb.search_index.push((
                format!("{} {}", std_doc.id, std_doc.title).to_lowercase(),
                json!({"kind": "standard", "id": std_doc.id, "title": std_doc.title}),
            ));
            kb.standards.insert(std_doc.id.clone(), std_doc);
        }

        // Later entries (supplement) override earlier (builtin) ones.
        for ec in codes {
            kb.search_index.push((
                format!("{} {} {}", ec.protocol, ec.name, ec.description)
                    .to_lowercase(),
                json!({
                    "kind": "error_code",
                    "protocol": ec.protocol,
                    "code": ec.code,
                    "name": ec.name,
                }),
            ));
            kb.error_codes.insert((ec.protocol, ec.code), ec);
        }

        for proc_tpl in procedures {
            kb.search_index.push((
                format!("{} {}", proc_tpl.name, proc_tpl.standard_ref)
                    .to_lowercase(),
                json!({
                    "kind": "procedure",
                    "name": proc_tpl.name,
                    "standard": proc_tpl.standard_ref,
                }),
            ));
            for proto in proc_tpl.protocols() {
                kb.procedures_by_protocol
                    .entry(proto)
                    .or_default()
                    .push(proc_tpl.clone());
            }
            kb.procedures_by_name
                .insert(proc_tpl.name.clone(), proc_tpl);
        }

        for ve in standards::builtin_vendor_extensions() {
            kb.search_index.push((
                format!("{} {}", ve.vendor, ve.description).to_lowercase(),
                json!({"kind": "vendor_extension", "vendor": ve.vendor}),
            ));
            kb.vendor_extensions
                .entry(ve.vendor.clone())
                .or_default()
                .push(ve);
        }

        Ok(kb)
    }

    pub fn error_code(
        &self,
        protocol: Protocol,
        code: u32,
    ) -> Option<&ErrorCodeEntry> {
        self.error_codes.get(&(protocol, code))
    }

    /// Cause text for a `(protocol, code)` pair; decoders fall back to the
    /// bare number when the catalog has no entry.
    pub fn cause_text(&self, protocol: Protocol, code: u32) -> Option<String> {
        self.error_code(protocol, code).map(|e| e.name.clone())
    }

    pub fn procedures(&self, protocol: Protocol) -> &[ProcedureTemplate] {
        self.procedures_by_protocol
            .get(&protocol)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn procedure_by_name(&self, name: &str) -> Option<&ProcedureTemplate> {
        self.procedures_by_name.get(name)
    }

    pub fn all_procedures(&self) -> impl Iterator<Item = &ProcedureTemplate> {
        self.procedures_by_name.values()
    }

    pub fn standard(&self, id: &str) -> Option<&Standard> {
        self.standards.get(id)
    }

    pub fn vendor_extensions(&self, vendor: &str) -> &[VendorExtension] {
        self.vendor_extensions
            .get(vendor)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Exact-id lookup first, then a lowercase substring scan of the index.
    pub fn search(&self, query: &str) -> Vec<Value> {
        if let Some(std_doc) = self.standards.get(query) {
            return vec![json!({
                "kind": "standard",
                "id": std_doc.id,
                "title": std_doc.title,
            })];
        }
        if let Some(proc_tpl) = self.procedures_by_name.get(query) {
            return vec![json!({
                "kind": "procedure",
                "name": proc_tpl.name,
                "standard": proc_tpl.standard_ref,
            })];
        }

        let needle = query.to_lowercase();
        self.search_index
            .iter()
            .filter(|(hay, _)| hay.contains(&needle))
            .map(|(_, v)| v.clone())
            .collect()
    }

    pub fn error_code_count(&self) -> usize {
        self.error_codes.len()
    }
}

fn read_supplement(path: &Path) -> Result<Supplement, KbError> {
    let text = fs::read_to_string(path).map_err(|source| KbError::Io {
        path: path.display().to_string(),
        source,
    })?;
    serde_yaml::from_str(&text).map_err(|source| KbError::Malformed {
        path: path.display().to_string(),
        source,
    })
}
