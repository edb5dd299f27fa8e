// Shared wire types: cursor reading helpers and the oid table used in
// RowDescription / ParameterDescription messages.

use std::io::Cursor;

use bytes::{Buf, BytesMut};

use crate::errors::Error;

/// Read C-strings and counted blobs out of a message cursor.
pub trait BytesMutReader {
    /// Read bytes up to (and consuming) a NUL terminator. The terminator is
    /// not part of the returned value.
    fn read_string(&mut self) -> Result<String, Error>;
}

impl BytesMutReader for Cursor<&BytesMut> {
    fn read_string(&mut self) -> Result<String, Error> {
        let mut value = Vec::new();
        loop {
            if !self.has_remaining() {
                return Err(Error::Protocol("string is not nul-terminated".into()));
            }
            match self.get_u8() {
                0 => break,
                c => value.push(c),
            }
        }
        String::from_utf8(value).map_err(|_| Error::Protocol("string is not valid UTF-8".into()))
    }
}

/// Data types the gateway knows how to describe and encode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    Bool,
    Bytea,
    Int2,
    Int4,
    Int8,
    Text,
    Float4,
    Float8,
    Varchar,
    Date,
    Timestamp,
    Numeric,
    TextArray,
}

impl DataType {
    pub fn oid(&self) -> i32 {
        match self {
            DataType::Bool => 16,
            DataType::Bytea => 17,
            DataType::Int8 => 20,
            DataType::Int2 => 21,
            DataType::Int4 => 23,
            DataType::Text => 25,
            DataType::Float4 => 700,
            DataType::Float8 => 701,
            DataType::Varchar => 1043,
            DataType::Date => 1082,
            DataType::Timestamp => 1114,
            DataType::Numeric => 1700,
            DataType::TextArray => 1009,
        }
    }

    /// Fixed byte width for the RowDescription `typlen` field, -1 when the
    /// type is variable-length.
    pub fn type_size(&self) -> i16 {
        match self {
            DataType::Bool => 1,
            DataType::Int2 => 2,
            DataType::Int4 | DataType::Float4 | DataType::Date => 4,
            DataType::Int8 | DataType::Float8 | DataType::Timestamp => 8,
            _ => -1,
        }
    }
}

impl From<&DataType> for i32 {
    fn from(data_type: &DataType) -> Self {
        data_type.oid()
    }
}
