//! Statements, values and row sets.
//!
//! A statement names one stored procedure call with named parameters; the
//! backend answers with a row set. Correlation ids are attached by the pump
//! when it assembles a batch, not carried inside the statement.

use std::fmt;

/// A single procedure parameter or result cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit integer (ids, tick counts).
    BigInt(i64),
    /// 32-bit integer (counts, flags).
    Int(i32),
    /// Double-precision float (obfuscated schedule positions).
    Double(f64),
    /// Raw bytes (ciphertexts, hashes, signatures, DER keys).
    Bytes(Vec<u8>),
}

impl Value {
    /// The contained i64, if this is a [`Value::BigInt`].
    pub fn as_bigint(&self) -> Option<i64> {
        match self {
            Self::BigInt(v) => Some(*v),
            _ => None,
        }
    }

    /// The contained i32, if this is a [`Value::Int`].
    pub fn as_int(&self) -> Option<i32> {
        match self {
            Self::Int(v) => Some(*v),
            _ => None,
        }
    }

    /// The contained f64, if this is a [`Value::Double`].
    pub fn as_double(&self) -> Option<f64> {
        match self {
            Self::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// The contained bytes, if this is a [`Value::Bytes`].
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(v) => Some(v),
            _ => None,
        }
    }
}

/// One stored procedure invocation.
#[derive(Clone, PartialEq)]
pub struct Statement {
    /// Procedure name, e.g. `createaccount` or `getplannername`.
    pub call: String,
    /// Named parameters in declaration order.
    pub params: Vec<(&'static str, Value)>,
}

impl Statement {
    /// Build a statement.
    pub fn new(call: impl Into<String>, params: Vec<(&'static str, Value)>) -> Self {
        Self {
            call: call.into(),
            params,
        }
    }

    /// Look up a parameter by name.
    pub fn param(&self, name: &str) -> Option<&Value> {
        self.params
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| v)
    }
}

impl fmt::Debug for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Parameter values are mostly ciphertext; log names only.
        let names: Vec<&str> = self.params.iter().map(|(n, _)| *n).collect();
        write!(f, "Statement({}, params: {names:?})", self.call)
    }
}

/// One result row. Cells are positional; `None` is SQL NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row(pub Vec<Option<Value>>);

impl Row {
    /// The cell at `index`, flattening NULL.
    pub fn get(&self, index: usize) -> Option<&Value> {
        self.0.get(index).and_then(|cell| cell.as_ref())
    }

    /// Byte cell accessor.
    pub fn bytes(&self, index: usize) -> Option<&[u8]> {
        self.get(index).and_then(Value::as_bytes)
    }

    /// i64 cell accessor.
    pub fn bigint(&self, index: usize) -> Option<i64> {
        self.get(index).and_then(Value::as_bigint)
    }

    /// f64 cell accessor.
    pub fn double(&self, index: usize) -> Option<f64> {
        self.get(index).and_then(Value::as_double)
    }
}

/// The rows a single statement produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowSet {
    pub rows: Vec<Row>,
}

impl RowSet {
    /// An empty result.
    pub fn empty() -> Self {
        Self::default()
    }

    /// A one-row result.
    pub fn single(row: Vec<Option<Value>>) -> Self {
        Self {
            rows: vec![Row(row)],
        }
    }

    /// The first row, if any.
    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    /// True when no rows came back.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
