// SPDX-FileCopyrightText: Copyright (c) 2024-2026 NVIDIA CORPORATION & AFFILIATES. All rights reserved.
// SPDX-License-Identifier: Apache-2.0

//! Process-wide lookup of format descriptors.
//!
//! The registry is assembled once from the built-in descriptor table (plus anything a
//! caller registers through [`FormatRegistryBuilder`]) and is read-only afterwards, so
//! lookups never take a lock.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::OnceLock;

use strum::IntoEnumIterator;

use crate::error::{ChatFormatError, Result, SchemaConflict};
use crate::formats::{ChatFormat, FormatDescriptor, descriptor_for};

static REGISTRY: OnceLock<FormatRegistry> = OnceLock::new();

/// Immutable map from [`ChatFormat`] to its descriptor.
#[derive(Debug, Clone)]
pub struct FormatRegistry {
    descriptors: HashMap<ChatFormat, FormatDescriptor>,
}

#[derive(Debug, Default)]
pub struct FormatRegistryBuilder {
    descriptors: HashMap<ChatFormat, FormatDescriptor>,
}

impl FormatRegistryBuilder {
    /// Register `descriptor` under its format.
    ///
    /// Registering an identical descriptor twice is a no-op. A different descriptor for
    /// an already registered format is rejected and the registry is left unchanged.
    pub fn register(&mut self, descriptor: FormatDescriptor) -> Result<&mut Self> {
        match self.descriptors.get(&descriptor.format) {
            Some(existing) if *existing == descriptor => {
                tracing::trace!(format = %descriptor.format, "descriptor already registered");
            }
            Some(_) => {
                return Err(SchemaConflict::ConflictingDescriptor {
                    format: descriptor.format,
                }
                .into());
            }
            None => {
                self.descriptors.insert(descriptor.format, descriptor);
            }
        }
        Ok(self)
    }

    /// Register the built-in descriptor of every [`ChatFormat`].
    pub fn with_defaults(&mut self) -> Result<&mut Self> {
        for format in ChatFormat::iter() {
            self.register(descriptor_for(format))?;
        }
        Ok(self)
    }

    pub fn build(self) -> FormatRegistry {
        tracing::debug!(formats = self.descriptors.len(), "format registry built");
        FormatRegistry {
            descriptors: self.descriptors,
        }
    }
}

impl FormatRegistry {
    pub fn builder() -> FormatRegistryBuilder {
        FormatRegistryBuilder::default()
    }

    /// Registry holding every built-in descriptor.
    pub fn with_defaults() -> FormatRegistry {
        let descriptors = ChatFormat::iter()
            .map(|format| (format, descriptor_for(format)))
            .collect();
        FormatRegistry { descriptors }
    }

    pub fn lookup(&self, format: ChatFormat) -> Result<&FormatDescriptor> {
        self.descriptors
            .get(&format)
            .ok_or_else(|| self.unknown(format.as_str()))
    }

    /// Resolve a format by its stable name. Matching ignores ASCII case and treats `-`
    /// as `_`, so `Hermes-2-Pro` finds `hermes_2_pro`.
    pub fn lookup_by_name(&self, name: &str) -> Result<&FormatDescriptor> {
        let normalized = name.trim().replace('-', "_");
        let format = ChatFormat::from_str(&normalized).map_err(|_| self.unknown(name))?;
        self.lookup(format)
    }

    /// Names of the registered formats, sorted.
    pub fn available_formats(&self) -> Vec<&'static str> {
        let mut formats: Vec<&'static str> = self.descriptors.keys().map(|f| f.as_str()).collect();
        formats.sort_unstable();
        formats
    }

    pub fn iter(&self) -> impl Iterator<Item = &FormatDescriptor> {
        self.descriptors.values()
    }

    pub fn len(&self) -> usize {
        self.descriptors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.descriptors.is_empty()
    }

    fn unknown(&self, name: &str) -> ChatFormatError {
        ChatFormatError::UnknownFormat {
            name: name.to_string(),
            available: self.available_formats(),
        }
    }
}

/// The process-wide registry of built-in descriptors.
pub fn get_format_registry() -> &'static FormatRegistry {
    REGISTRY.get_or_init(FormatRegistry::with_defaults)
}

pub fn lookup(format: ChatFormat) -> Result<&'static FormatDescriptor> {
    get_format_registry().lookup(format)
}

pub fn lookup_by_name(name: &str) -> Result<&'static FormatDescriptor> {
    get_format_registry().lookup_by_name(name)
}

pub fn available_formats() -> Vec<&'static str> {
    get_format_registry().available_formats()
}
