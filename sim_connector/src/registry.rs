//! Name → typed slot mapping with cached values.
//!
//! Slots are addressed internally by [`SlotRef`]. The integer ids the
//! simulator sees are derived from it with a fixed mapping:
//!
//! | kind    | wire id                      |
//! |---------|------------------------------|
//! | numeric | `3 + index`                  |
//! | text    | `10000 + 1 + index`          |
//!
//! Ids 0–2 belong to the two client response channels and the aircraft title.
//! The numeric space ends at `10000`; names past that are refused rather than
//! spilling into the text ids.

use crate::gateway::{DataArea, SlotSubscription, STRING_VALUE_MAX_SLOTS, STRING_VALUE_SIZE};
use simlink_protocol::{NumericVarRow, TextVarRow};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, warn};

pub const NUMERIC_ID_OFFSET: u32 = 3;
pub const TEXT_ID_OFFSET: u32 = 10_000;
const NUMERIC_VALUE_SIZE: u32 = 4;
/// Numeric ids run from `3` to `10000` inclusive.
pub const NUMERIC_MAX_SLOTS: usize = (TEXT_ID_OFFSET - NUMERIC_ID_OFFSET + 1) as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Numeric,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotRef {
    pub kind: SlotKind,
    pub index: usize,
}

impl SlotRef {
    pub fn wire_id(self) -> u32 {
        let index = self.index as u32;
        match self.kind {
            SlotKind::Numeric => NUMERIC_ID_OFFSET + index,
            SlotKind::Text => TEXT_ID_OFFSET + 1 + index,
        }
    }

    pub fn from_wire_id(id: u32) -> Option<Self> {
        if id > TEXT_ID_OFFSET {
            Some(Self {
                kind: SlotKind::Text,
                index: (id - TEXT_ID_OFFSET - 1) as usize,
            })
        } else if id >= NUMERIC_ID_OFFSET {
            Some(Self {
                kind: SlotKind::Numeric,
                index: (id - NUMERIC_ID_OFFSET) as usize,
            })
        } else {
            None
        }
    }

    /// Placement of this slot inside the runtime client's data areas.
    pub fn subscription(self) -> SlotSubscription {
        let index = self.index as u32;
        match self.kind {
            SlotKind::Numeric => SlotSubscription {
                request_id: self.wire_id(),
                area: DataArea::LVars,
                offset: index * NUMERIC_VALUE_SIZE,
                size: NUMERIC_VALUE_SIZE,
            },
            SlotKind::Text => SlotSubscription {
                request_id: self.wire_id(),
                area: DataArea::StringVars,
                offset: index * STRING_VALUE_SIZE,
                size: STRING_VALUE_SIZE,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SlotValue {
    Numeric(f32),
    Text(String),
}

impl fmt::Display for SlotValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SlotValue::Numeric(v) => write!(f, "{v}"),
            SlotValue::Text(s) => f.write_str(s),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolved {
    pub slot: SlotRef,
    pub newly_registered: bool,
}

struct NumericSlot {
    name: String,
    value: Option<f32>,
}

struct TextSlot {
    name: String,
    value: Option<String>,
}

#[derive(Default)]
pub struct VariableRegistry {
    numeric: Vec<NumericSlot>,
    text: Vec<TextSlot>,
    by_name: HashMap<String, SlotRef>,
    lvars: Vec<String>,
    lvar_staging: Option<Vec<String>>,
}

impl VariableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.numeric.len() + self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lookup(&self, name: &str) -> Option<SlotRef> {
        self.by_name.get(name).copied()
    }

    /// Returns the slot for `name`, allocating one if the name is new. The
    /// caller must subscribe a newly registered slot before handling anything
    /// else, so allocation and registration stay one step.
    ///
    /// `None` when the name is new and its id space is exhausted.
    pub fn resolve(&mut self, name: &str) -> Option<Resolved> {
        if let Some(slot) = self.lookup(name) {
            return Some(Resolved {
                slot,
                newly_registered: false,
            });
        }

        let kind = classify(name);
        let slot = match kind {
            SlotKind::Numeric => {
                if self.numeric.len() >= NUMERIC_MAX_SLOTS {
                    warn!(
                        name,
                        allocated = self.numeric.len(),
                        "numeric id space exhausted, variable not registered"
                    );
                    return None;
                }
                self.numeric.push(NumericSlot {
                    name: name.to_string(),
                    value: None,
                });
                SlotRef {
                    kind,
                    index: self.numeric.len() - 1,
                }
            }
            SlotKind::Text => {
                if self.text.len() as u32 >= STRING_VALUE_MAX_SLOTS {
                    warn!(name, "text variable area is full, value updates will not arrive");
                }
                self.text.push(TextSlot {
                    name: name.to_string(),
                    value: None,
                });
                SlotRef {
                    kind,
                    index: self.text.len() - 1,
                }
            }
        };
        self.by_name.insert(name.to_string(), slot);
        debug!(name, id = slot.wire_id(), ?kind, "registered variable");

        Some(Resolved {
            slot,
            newly_registered: true,
        })
    }

    /// Stores a raw value delivered for wire id `id`. Returns false when the
    /// update was dropped.
    pub fn update_value(&mut self, id: u32, raw: &[u8]) -> bool {
        let Some(slot) = SlotRef::from_wire_id(id) else {
            warn!(id, "value update for reserved id dropped");
            return false;
        };

        match slot.kind {
            SlotKind::Numeric => {
                let Some(entry) = self.numeric.get_mut(slot.index) else {
                    warn!(id, allocated = self.numeric.len(), "numeric update out of range");
                    return false;
                };
                let Some(bytes) = raw.get(..NUMERIC_VALUE_SIZE as usize) else {
                    warn!(id, len = raw.len(), "short numeric payload dropped");
                    return false;
                };
                let mut word = [0u8; 4];
                word.copy_from_slice(bytes);
                entry.value = Some(f32::from_le_bytes(word));
            }
            SlotKind::Text => {
                let Some(entry) = self.text.get_mut(slot.index) else {
                    warn!(id, allocated = self.text.len(), "text update out of range");
                    return false;
                };
                let end = raw.len().min(STRING_VALUE_SIZE as usize);
                entry.value = Some(crate::gateway::decode_c_string(&raw[..end]));
            }
        }
        true
    }

    pub fn value(&self, slot: SlotRef) -> Option<SlotValue> {
        match slot.kind {
            SlotKind::Numeric => self
                .numeric
                .get(slot.index)
                .map(|s| SlotValue::Numeric(s.value.unwrap_or(0.0))),
            SlotKind::Text => self.text.get(slot.index).map(|s| {
                SlotValue::Text(s.value.clone().unwrap_or_else(|| "0".to_string()))
            }),
        }
    }

    /// Cached value for `name`; `0` / `"0"` until the first delivery.
    pub fn current_value(&self, name: &str) -> Option<SlotValue> {
        self.value(self.lookup(name)?)
    }

    /// Numeric rows, text rows and LVar names as three back-to-back JSON
    /// arrays.
    pub fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        let numeric: Vec<NumericVarRow> = self
            .numeric
            .iter()
            .enumerate()
            .map(|(index, s)| NumericVarRow {
                name: s.name.clone(),
                id: SlotRef {
                    kind: SlotKind::Numeric,
                    index,
                }
                .wire_id(),
                data: s.value.unwrap_or(0.0),
            })
            .collect();
        let text: Vec<TextVarRow> = self
            .text
            .iter()
            .enumerate()
            .map(|(index, s)| TextVarRow {
                name: s.name.clone(),
                id: SlotRef {
                    kind: SlotKind::Text,
                    index,
                }
                .wire_id(),
                data: s.value.clone(),
            })
            .collect();

        let mut out = serde_json::to_string(&numeric)?;
        out.push_str(&serde_json::to_string(&text)?);
        out.push_str(&serde_json::to_string(&self.lvars)?);
        Ok(out)
    }

    pub fn lvars(&self) -> &[String] {
        &self.lvars
    }

    pub fn begin_lvar_list(&mut self) {
        self.lvar_staging = Some(Vec::new());
    }

    /// Returns false if no list is being received.
    pub fn push_lvar(&mut self, name: &str) -> bool {
        match self.lvar_staging.as_mut() {
            Some(staging) => {
                staging.push(name.to_string());
                true
            }
            None => false,
        }
    }

    /// Swaps the staged list in. Returns the new snapshot length, or `None`
    /// if no list was being received.
    pub fn finish_lvar_list(&mut self) -> Option<usize> {
        let staged = self.lvar_staging.take()?;
        self.lvars = staged;
        Some(self.lvars.len())
    }

    pub fn reset(&mut self) {
        self.numeric.clear();
        self.text.clear();
        self.by_name.clear();
        self.lvars.clear();
        self.lvar_staging = None;
    }
}

/// `(A:TITLE, String)` style presets are text; everything else is numeric.
pub fn classify(name: &str) -> SlotKind {
    const PATTERN: [&str; 6] = ["(", "a", ":", ",", "string", ")"];

    let lower = name.to_ascii_lowercase();
    let mut rest = lower.as_str();
    for token in PATTERN {
        match rest.find(token) {
            Some(pos) => rest = &rest[pos + token.len()..],
            None => return SlotKind::Numeric,
        }
    }
    SlotKind::Text
}
