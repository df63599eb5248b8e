//! # Value Identifier & Vocabulary
//!
//! Core of the data model: [`Id`], a 64-bit tagged value identifier, and
//! [`Vocabulary`], the read-only string-to-index dictionary that on-disk
//! `VocabIndex` ids point into. A per-query [`LocalVocab`] holds strings
//! produced during evaluation (e.g. `GROUP_CONCAT` results) that never
//! reach disk.
//!
//! ## Usage
//!
//! ```
//! use sparql_core::value::{Id, Datatype};
//!
//! let a = Id::from_int(42);
//! let b = Id::from_double(3.5);
//! assert_eq!(a.datatype(), Datatype::Int);
//! assert_eq!(b.datatype(), Datatype::Double);
//! assert!(a.compare_without_local_vocab(&b) != std::cmp::Ordering::Equal);
//! ```

pub mod vocabulary;

pub use vocabulary::{LocalVocab, VocabIndex, Vocabulary};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// The closed set of datatypes an [`Id`] may carry. Order here **is** the
/// primary sort key for `compare_without_local_vocab` (spec §3: "lexicographically
/// first by datatype, then by payload").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum Datatype {
    Undefined = 0,
    Int = 1,
    Double = 2,
    Bool = 3,
    VocabIndex = 4,
    LocalVocabIndex = 5,
    TextRecordIndex = 6,
    Date = 7,
    BlankNodeIndex = 8,
}

const TAG_BITS: u32 = 4;
const TAG_SHIFT: u32 = 64 - TAG_BITS;
const PAYLOAD_MASK: u64 = bit_mask_for_lower_bits(TAG_SHIFT);

/// `BitPacking.h`'s `bitMaskForLowerBits`: the lowest `num_bits` bits set,
/// zero elsewhere. A `const fn` because the tag/payload split has to be
/// computable at compile time.
const fn bit_mask_for_lower_bits(num_bits: u32) -> u64 {
    if num_bits >= 64 {
        u64::MAX
    } else {
        (1u64 << num_bits) - 1
    }
}

impl Datatype {
    const fn from_tag(tag: u8) -> Datatype {
        match tag {
            0 => Datatype::Undefined,
            1 => Datatype::Int,
            2 => Datatype::Double,
            3 => Datatype::Bool,
            4 => Datatype::VocabIndex,
            5 => Datatype::LocalVocabIndex,
            6 => Datatype::TextRecordIndex,
            7 => Datatype::Date,
            8 => Datatype::BlankNodeIndex,
            _ => Datatype::Undefined,
        }
    }

    /// `true` for the subset of datatypes permitted to appear in an
    /// on-disk permutation (spec §3 invariant).
    pub fn is_persistable(self) -> bool {
        !matches!(
            self,
            Datatype::Undefined | Datatype::LocalVocabIndex | Datatype::TextRecordIndex
        )
    }
}

/// A 64-bit tagged value identifier. Trivially copyable, total order via
/// [`Id::compare_without_local_vocab`].
///
/// Layout: the high [`TAG_BITS`] bits hold the [`Datatype`] tag, the
/// remaining 60 bits hold the payload. This mirrors the bit-packing scheme
/// of the reference indexer (tag in the top bits, payload below), with one
/// difference: `Double` payloads are stored as the IEEE-754 bit pattern of
/// the value shifted right by `TAG_BITS`, i.e. the low mantissa bits are
/// truncated to make room for the tag. This is a lossy but *stable*
/// transform: encoding then decoding the same `f64` is idempotent, but the
/// round trip is not bit-exact (spec §8 property 1 allows "within 1 ULP").
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id {
    bits: u64,
}

impl Id {
    const fn from_tag_and_payload(tag: Datatype, payload: u64) -> Id {
        Id {
            bits: ((tag as u64) << TAG_SHIFT) | (payload & PAYLOAD_MASK),
        }
    }

    pub const fn undefined() -> Id {
        Id::from_tag_and_payload(Datatype::Undefined, 0)
    }

    /// Integers are stored two's-complement in the payload bits; values
    /// that don't fit in `TAG_SHIFT` bits are truncated, matching the
    /// "fixed-width token" contract (the index builder is responsible for
    /// keeping ingested integers in range).
    pub const fn from_int(value: i64) -> Id {
        Id::from_tag_and_payload(Datatype::Int, value as u64)
    }

    pub fn from_double(value: f64) -> Id {
        let bits = value.to_bits() >> TAG_BITS;
        Id::from_tag_and_payload(Datatype::Double, bits)
    }

    pub const fn from_bool(value: bool) -> Id {
        Id::from_tag_and_payload(Datatype::Bool, value as u64)
    }

    pub const fn from_vocab_index(index: VocabIndex) -> Id {
        Id::from_tag_and_payload(Datatype::VocabIndex, index.0)
    }

    pub const fn from_local_vocab_index(index: u64) -> Id {
        Id::from_tag_and_payload(Datatype::LocalVocabIndex, index)
    }

    pub const fn from_text_record_index(index: u64) -> Id {
        Id::from_tag_and_payload(Datatype::TextRecordIndex, index)
    }

    pub const fn from_blank_node_index(index: u64) -> Id {
        Id::from_tag_and_payload(Datatype::BlankNodeIndex, index)
    }

    /// Days since the Unix epoch, matching [`chrono::NaiveDate`]'s
    /// `num_days_from_ce` shifted to an epoch baseline.
    pub fn from_date(date: NaiveDate) -> Id {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch date");
        let days = (date - epoch).num_days();
        Id::from_tag_and_payload(Datatype::Date, days as u64)
    }

    pub const fn datatype(self) -> Datatype {
        Datatype::from_tag((self.bits >> TAG_SHIFT) as u8)
    }

    const fn payload_bits(self) -> u64 {
        self.bits & PAYLOAD_MASK
    }

    /// Sign-extends the payload back into an `i64`. Only meaningful when
    /// `datatype() == Datatype::Int`.
    pub const fn as_int_unchecked(self) -> i64 {
        let shifted = (self.payload_bits() as i64) << TAG_BITS;
        shifted >> TAG_BITS
    }

    pub fn as_double_unchecked(self) -> f64 {
        f64::from_bits(self.payload_bits() << TAG_BITS)
    }

    pub const fn as_bool_unchecked(self) -> bool {
        self.payload_bits() != 0
    }

    pub const fn as_vocab_index_unchecked(self) -> VocabIndex {
        VocabIndex(self.payload_bits())
    }

    pub const fn as_local_vocab_index_unchecked(self) -> u64 {
        self.payload_bits()
    }

    pub fn as_date_unchecked(self) -> NaiveDate {
        let epoch = NaiveDate::from_ymd_opt(1970, 1, 1).expect("valid epoch date");
        epoch + chrono::Duration::days(self.payload_bits() as i64)
    }

    /// Raw 64 bits, as written to / read from a permutation file.
    pub const fn to_bits(self) -> u64 {
        self.bits
    }

    pub const fn from_bits(bits: u64) -> Id {
        Id { bits }
    }

    /// `true` for the datatype subset allowed on disk (spec §3 invariant:
    /// "every id that appears in an on-disk permutation is one of
    /// {Int, Double, Bool, VocabIndex, Date, BlankNodeIndex}").
    pub fn is_persistable(self) -> bool {
        self.datatype().is_persistable()
    }

    /// Full comparison: local-vocab ids compare by string content. Requires
    /// access to the owning [`LocalVocab`] to resolve the string; only
    /// valid within a single query's lifetime.
    pub fn compare_full(&self, other: &Id, local_vocab: &LocalVocab) -> Ordering {
        match (self.datatype(), other.datatype()) {
            (Datatype::LocalVocabIndex, Datatype::LocalVocabIndex) => {
                let a = local_vocab.get(self.as_local_vocab_index_unchecked());
                let b = local_vocab.get(other.as_local_vocab_index_unchecked());
                a.cmp(b)
            }
            _ => self.compare_without_local_vocab(other),
        }
    }

    /// The order permitted wherever bytes are written to disk (spec §4.1):
    /// local-vocab ids compare by their raw index only, which is stable
    /// within one query but meaningless across queries or on disk. Ordering
    /// is first by [`Datatype`], then numerically by payload for numeric
    /// types, else by raw payload bits.
    pub fn compare_without_local_vocab(&self, other: &Id) -> Ordering {
        let (dt_a, dt_b) = (self.datatype(), other.datatype());
        if dt_a != dt_b {
            return dt_a.cmp(&dt_b);
        }
        match dt_a {
            Datatype::Int => self.as_int_unchecked().cmp(&other.as_int_unchecked()),
            Datatype::Double => self
                .as_double_unchecked()
                .partial_cmp(&other.as_double_unchecked())
                .unwrap_or(Ordering::Equal),
            _ => self.payload_bits().cmp(&other.payload_bits()),
        }
    }
}

impl PartialOrd for Id {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.compare_without_local_vocab(other))
    }
}

impl Ord for Id {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare_without_local_vocab(other)
    }
}

impl fmt::Debug for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.datatype() {
            Datatype::Undefined => write!(f, "Id::Undefined"),
            Datatype::Int => write!(f, "Id::Int({})", self.as_int_unchecked()),
            Datatype::Double => write!(f, "Id::Double({})", self.as_double_unchecked()),
            Datatype::Bool => write!(f, "Id::Bool({})", self.as_bool_unchecked()),
            Datatype::VocabIndex => {
                write!(f, "Id::VocabIndex({})", self.as_vocab_index_unchecked().0)
            }
            Datatype::LocalVocabIndex => {
                write!(f, "Id::LocalVocabIndex({})", self.as_local_vocab_index_unchecked())
            }
            Datatype::TextRecordIndex => {
                write!(f, "Id::TextRecordIndex({})", self.payload_bits())
            }
            Datatype::Date => write!(f, "Id::Date({})", self.as_date_unchecked()),
            Datatype::BlankNodeIndex => write!(f, "Id::BlankNodeIndex({})", self.payload_bits()),
        }
    }
}

/// The result of converting an [`Id`] (or a non-`Id` literal produced by
/// expression evaluation) into a number. SPARQL's arithmetic coercion rules:
/// IRIs and strings are never numeric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum NumericValue {
    NotNumeric,
    Int(i64),
    Double(f64),
}

impl NumericValue {
    pub fn as_f64(self) -> Option<f64> {
        match self {
            NumericValue::NotNumeric => None,
            NumericValue::Int(i) => Some(i as f64),
            NumericValue::Double(d) => Some(d),
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, NumericValue::NotNumeric)
    }
}

/// Convert an [`Id`] into a [`NumericValue`] using SPARQL's numeric
/// coercion rules (spec §4.1): only `Int`/`Double`/`Bool` are numeric;
/// everything else (vocabulary references, dates, blank nodes, undefined)
/// is not.
pub fn numeric_value_getter(id: Id) -> NumericValue {
    match id.datatype() {
        Datatype::Int => NumericValue::Int(id.as_int_unchecked()),
        Datatype::Double => NumericValue::Double(id.as_double_unchecked()),
        Datatype::Bool => NumericValue::Int(id.as_bool_unchecked() as i64),
        _ => NumericValue::NotNumeric,
    }
}

/// Compares two [`NumericValue`]s using IEEE-754-normalized numeric
/// ordering (spec §4.1: "Integer<->double comparisons follow IEEE-754
/// normalized numeric ordering").
pub fn compare_numeric(a: NumericValue, b: NumericValue) -> Option<Ordering> {
    match (a, b) {
        (NumericValue::NotNumeric, _) | (_, NumericValue::NotNumeric) => None,
        (NumericValue::Int(x), NumericValue::Int(y)) => Some(x.cmp(&y)),
        _ => a.as_f64()?.partial_cmp(&b.as_f64()?),
    }
}
