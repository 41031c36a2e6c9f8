//! Engine configuration
//!
//! Selects the calling convention, the register-cache ring layout, opcode
//! fusion and the compile mode. A configuration is checked once when an
//! instance is created; invalid ring layouts never reach the dispatch core.

use crate::parser::module::ValueType;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::dispatch::RING_SLOTS;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("malformed configuration: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{value_type} ring range {begin}..{end} exceeds {} slots", RING_SLOTS)]
    RangeOutOfBounds { value_type: ValueType, begin: u8, end: u8 },

    #[error("{value_type} ring range {begin}..{end} differs from the i32 range {i32_begin}..{i32_end}")]
    RangeMismatch {
        value_type: ValueType,
        begin: u8,
        end: u8,
        i32_begin: u8,
        i32_end: u8,
    },

    #[error("call depth limit must be at least 1")]
    ZeroCallDepth,
}

/// How handlers hand control to their successor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConventionKind {
    /// Handlers call the next handler directly.
    #[default]
    Chained,
    /// Handlers return the next instruction pointer to the trampoline.
    ByRef,
}

/// When function bodies are validated and translated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompileMode {
    #[default]
    FullCompile,
    LazyCompile,
    LazyCompileWithFullCodeVerification,
}

/// A half-open range of ring slot positions; empty disables caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SlotRange {
    pub begin: u8,
    pub end: u8,
}

impl SlotRange {
    pub fn new(begin: u8, end: u8) -> Self {
        SlotRange { begin, end }
    }

    pub fn is_empty(&self) -> bool {
        self.end <= self.begin
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            0
        } else {
            (self.end - self.begin) as usize
        }
    }
}

/// Per-type ring ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StackTop {
    pub i32: SlotRange,
    pub i64: SlotRange,
    pub f32: SlotRange,
    pub f64: SlotRange,
}

impl StackTop {
    /// The same range for every type
    pub fn uniform(range: SlotRange) -> Self {
        StackTop {
            i32: range,
            i64: range,
            f32: range,
            f64: range,
        }
    }

    pub fn range(&self, value_type: ValueType) -> SlotRange {
        match value_type {
            ValueType::I32 => self.i32,
            ValueType::I64 => self.i64,
            ValueType::F32 => self.f32,
            ValueType::F64 => self.f64,
        }
    }

    pub fn caches(&self, value_type: ValueType) -> bool {
        !self.range(value_type).is_empty()
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        let i32_range = self.i32;
        for value_type in [ValueType::I32, ValueType::I64, ValueType::F32, ValueType::F64] {
            let range = self.range(value_type);
            if range.is_empty() {
                continue;
            }
            if range.end as usize > RING_SLOTS {
                return Err(ConfigError::RangeOutOfBounds {
                    value_type,
                    begin: range.begin,
                    end: range.end,
                });
            }
            // a result written back over an operand of another type shares its slot
            if range != i32_range {
                return Err(ConfigError::RangeMismatch {
                    value_type,
                    begin: range.begin,
                    end: range.end,
                    i32_begin: i32_range.begin,
                    i32_end: i32_range.end,
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub convention: ConventionKind,
    pub stack_top: StackTop,
    pub fusion: bool,
    pub mode: CompileMode,
    pub max_call_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            convention: ConventionKind::Chained,
            stack_top: StackTop::default(),
            fusion: false,
            mode: CompileMode::FullCompile,
            max_call_depth: 1024,
        }
    }
}

impl EngineConfig {
    /// Parse and check a JSON configuration; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_call_depth == 0 {
            return Err(ConfigError::ZeroCallDepth);
        }
        self.stack_top.validate()
    }

    pub fn with_convention(mut self, convention: ConventionKind) -> Self {
        self.convention = convention;
        self
    }

    /// Cache every type in slots `begin..end`
    pub fn with_ring(mut self, begin: u8, end: u8) -> Self {
        self.stack_top = StackTop::uniform(SlotRange::new(begin, end));
        self
    }

    pub fn with_fusion(mut self, fusion: bool) -> Self {
        self.fusion = fusion;
        self
    }

    pub fn with_mode(mut self, mode: CompileMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }
}
