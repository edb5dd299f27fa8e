// Inbound message catalog. Each client message that can arrive after
// startup decodes into a tagged variant; encoding back to wire bytes is the
// exact inverse and is what the round-trip tests exercise.
//
// See: <https://www.postgresql.org/docs/current/protocol-message-formats.html>

use std::ffi::CString;
use std::io::Cursor;

use bytes::{Buf, BufMut, BytesMut};

use crate::errors::Error;
use crate::messages::constants::*;
use crate::messages::types::BytesMutReader;

/// One parsed client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontendMessage {
    Password {
        password: Vec<u8>,
    },
    Query {
        sql: String,
    },
    Parse {
        name: String,
        sql: String,
        param_types: Vec<i32>,
    },
    Bind {
        portal: String,
        statement: String,
        param_formats: Vec<i16>,
        param_values: Vec<Option<BytesMut>>,
        result_formats: Vec<i16>,
    },
    Describe {
        target: char,
        name: String,
    },
    Execute {
        portal: String,
        max_rows: i32,
    },
    Sync,
    Flush,
    Close {
        target: char,
        name: String,
    },
    Terminate,
    FunctionCall,
}

impl FrontendMessage {
    /// Decode a framed message from its type byte and payload (the payload
    /// excludes the type byte and the length field).
    pub fn decode(code: u8, body: &BytesMut) -> Result<FrontendMessage, Error> {
        let mut cursor = Cursor::new(body);
        match code {
            MESSAGE_PASSWORD => {
                let mut password = body.to_vec();
                // The password is a single C-string; drop the terminator.
                if password.last() == Some(&0) {
                    password.pop();
                }
                Ok(FrontendMessage::Password { password })
            }
            MESSAGE_QUERY => {
                let sql = cursor.read_string()?;
                Ok(FrontendMessage::Query { sql })
            }
            MESSAGE_PARSE => {
                let name = cursor.read_string()?;
                let sql = cursor.read_string()?;
                ensure_remaining(&cursor, 2)?;
                let num_params = cursor.get_i16();
                if num_params < 0 {
                    return Err(Error::Protocol("negative parameter type count".into()));
                }
                let mut param_types = Vec::with_capacity(num_params as usize);
                for _ in 0..num_params {
                    ensure_remaining(&cursor, 4)?;
                    param_types.push(cursor.get_i32());
                }
                Ok(FrontendMessage::Parse {
                    name,
                    sql,
                    param_types,
                })
            }
            MESSAGE_BIND => {
                let portal = cursor.read_string()?;
                let statement = cursor.read_string()?;

                ensure_remaining(&cursor, 2)?;
                let num_formats = cursor.get_i16();
                if num_formats < 0 {
                    return Err(Error::Protocol("negative parameter format count".into()));
                }
                let mut param_formats = Vec::with_capacity(num_formats as usize);
                for _ in 0..num_formats {
                    ensure_remaining(&cursor, 2)?;
                    param_formats.push(cursor.get_i16());
                }

                ensure_remaining(&cursor, 2)?;
                let num_values = cursor.get_i16();
                if num_values < 0 {
                    return Err(Error::Protocol("negative parameter value count".into()));
                }
                let mut param_values = Vec::with_capacity(num_values as usize);
                for _ in 0..num_values {
                    ensure_remaining(&cursor, 4)?;
                    let len = cursor.get_i32();
                    if len == -1 {
                        param_values.push(None);
                    } else if len < 0 {
                        return Err(Error::Protocol("negative parameter value length".into()));
                    } else {
                        ensure_remaining(&cursor, len as usize)?;
                        let mut value = BytesMut::with_capacity(len as usize);
                        for _ in 0..len {
                            value.put_u8(cursor.get_u8());
                        }
                        param_values.push(Some(value));
                    }
                }

                ensure_remaining(&cursor, 2)?;
                let num_result_formats = cursor.get_i16();
                if num_result_formats < 0 {
                    return Err(Error::Protocol("negative result format count".into()));
                }
                let mut result_formats = Vec::with_capacity(num_result_formats as usize);
                for _ in 0..num_result_formats {
                    ensure_remaining(&cursor, 2)?;
                    result_formats.push(cursor.get_i16());
                }

                Ok(FrontendMessage::Bind {
                    portal,
                    statement,
                    param_formats,
                    param_values,
                    result_formats,
                })
            }
            MESSAGE_DESCRIBE => {
                ensure_remaining(&cursor, 1)?;
                let target = cursor.get_u8() as char;
                let name = cursor.read_string()?;
                if target != 'S' && target != 'P' {
                    return Err(Error::Protocol(format!(
                        "invalid describe target {target:?}"
                    )));
                }
                Ok(FrontendMessage::Describe { target, name })
            }
            MESSAGE_EXECUTE => {
                let portal = cursor.read_string()?;
                ensure_remaining(&cursor, 4)?;
                let max_rows = cursor.get_i32();
                Ok(FrontendMessage::Execute { portal, max_rows })
            }
            MESSAGE_SYNC => Ok(FrontendMessage::Sync),
            MESSAGE_FLUSH => Ok(FrontendMessage::Flush),
            MESSAGE_CLOSE => {
                ensure_remaining(&cursor, 1)?;
                let target = cursor.get_u8() as char;
                let name = cursor.read_string()?;
                if target != 'S' && target != 'P' {
                    return Err(Error::Protocol(format!("invalid close target {target:?}")));
                }
                Ok(FrontendMessage::Close { target, name })
            }
            MESSAGE_TERMINATE => Ok(FrontendMessage::Terminate),
            MESSAGE_FUNCTION_CALL => Ok(FrontendMessage::FunctionCall),
            other => Err(Error::Protocol(format!(
                "unknown message code {:?}",
                other as char
            ))),
        }
    }

    /// Encode the message back into a full frame (type byte, length, payload).
    pub fn encode(&self) -> Result<BytesMut, Error> {
        let mut payload = BytesMut::new();
        let code = match self {
            FrontendMessage::Password { password } => {
                payload.put_slice(password);
                payload.put_u8(0);
                MESSAGE_PASSWORD
            }
            FrontendMessage::Query { sql } => {
                put_cstring(&mut payload, sql)?;
                MESSAGE_QUERY
            }
            FrontendMessage::Parse {
                name,
                sql,
                param_types,
            } => {
                put_cstring(&mut payload, name)?;
                put_cstring(&mut payload, sql)?;
                payload.put_i16(param_types.len() as i16);
                for oid in param_types {
                    payload.put_i32(*oid);
                }
                MESSAGE_PARSE
            }
            FrontendMessage::Bind {
                portal,
                statement,
                param_formats,
                param_values,
                result_formats,
            } => {
                put_cstring(&mut payload, portal)?;
                put_cstring(&mut payload, statement)?;
                payload.put_i16(param_formats.len() as i16);
                for format in param_formats {
                    payload.put_i16(*format);
                }
                payload.put_i16(param_values.len() as i16);
                for value in param_values {
                    match value {
                        Some(value) => {
                            payload.put_i32(value.len() as i32);
                            payload.put_slice(value);
                        }
                        None => payload.put_i32(-1),
                    }
                }
                payload.put_i16(result_formats.len() as i16);
                for format in result_formats {
                    payload.put_i16(*format);
                }
                MESSAGE_BIND
            }
            FrontendMessage::Describe { target, name } => {
                payload.put_u8(*target as u8);
                put_cstring(&mut payload, name)?;
                MESSAGE_DESCRIBE
            }
            FrontendMessage::Execute { portal, max_rows } => {
                put_cstring(&mut payload, portal)?;
                payload.put_i32(*max_rows);
                MESSAGE_EXECUTE
            }
            FrontendMessage::Sync => MESSAGE_SYNC,
            FrontendMessage::Flush => MESSAGE_FLUSH,
            FrontendMessage::Close { target, name } => {
                payload.put_u8(*target as u8);
                put_cstring(&mut payload, name)?;
                MESSAGE_CLOSE
            }
            FrontendMessage::Terminate => MESSAGE_TERMINATE,
            FrontendMessage::FunctionCall => MESSAGE_FUNCTION_CALL,
        };

        let mut frame = BytesMut::with_capacity(payload.len() + 5);
        frame.put_u8(code);
        frame.put_i32(payload.len() as i32 + 4);
        frame.put(payload);
        Ok(frame)
    }
}

fn put_cstring(buf: &mut BytesMut, value: &str) -> Result<(), Error> {
    let value = CString::new(value)
        .map_err(|_| Error::Protocol("string contains an interior nul byte".into()))?;
    buf.put_slice(value.as_bytes_with_nul());
    Ok(())
}

fn ensure_remaining(cursor: &Cursor<&BytesMut>, needed: usize) -> Result<(), Error> {
    if cursor.remaining() < needed {
        return Err(Error::Protocol("message payload is truncated".into()));
    }
    Ok(())
}
