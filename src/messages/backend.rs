// Outbound message builders. Every function returns a fully framed message
// ready to be appended to the session's write buffer.

use bytes::{BufMut, BytesMut};

use crate::messages::types::DataType;

/// One column of a RowDescription.
pub struct RowField<'a> {
    pub name: &'a str,
    pub data_type: DataType,
    pub format: i16,
}

/// Create an AuthenticationOk message.
pub fn authentication_ok() -> BytesMut {
    let mut bytes = BytesMut::with_capacity(9);
    bytes.put_u8(b'R');
    bytes.put_i32(8);
    bytes.put_i32(0);
    bytes
}

/// Create an AuthenticationCleartextPassword challenge.
pub fn cleartext_password_challenge() -> BytesMut {
    let mut bytes = BytesMut::with_capacity(9);
    bytes.put_u8(b'R');
    bytes.put_i32(8);
    bytes.put_i32(3);
    bytes
}

/// Create a ParameterStatus message.
pub fn server_parameter_message(key: &str, value: &str) -> BytesMut {
    let mut server_info = BytesMut::new();
    server_info.put_u8(b'S');
    server_info.put_i32(4 + key.len() as i32 + 1 + value.len() as i32 + 1);
    server_info.put_slice(key.as_bytes());
    server_info.put_bytes(0, 1);
    server_info.put_slice(value.as_bytes());
    server_info.put_bytes(0, 1);

    server_info
}

/// Create a BackendKeyData message.
pub fn backend_key_data(process_id: i32, secret_key: i32) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(13);
    bytes.put_u8(b'K');
    bytes.put_i32(12);
    bytes.put_i32(process_id);
    bytes.put_i32(secret_key);
    bytes
}

/// Create a ReadyForQuery message carrying the transaction status byte.
pub fn ready_for_query(status: u8) -> BytesMut {
    let mut bytes = BytesMut::with_capacity(6);
    bytes.put_u8(b'Z');
    bytes.put_i32(5);
    bytes.put_u8(status);
    bytes
}

/// Create a RowDescription message.
pub fn row_description(fields: &[RowField]) -> BytesMut {
    let mut res = BytesMut::new();
    let mut row_desc = BytesMut::new();

    row_desc.put_i16(fields.len() as i16);

    for field in fields {
        // Column name
        row_desc.put_slice(field.name.as_bytes());
        row_desc.put_u8(0);

        // Doesn't belong to any table
        row_desc.put_i32(0);
        row_desc.put_i16(0);

        row_desc.put_i32(field.data_type.oid());
        row_desc.put_i16(field.data_type.type_size());

        // Type modifier
        row_desc.put_i32(-1);

        row_desc.put_i16(field.format);
    }

    res.put_u8(b'T');
    res.put_i32(row_desc.len() as i32 + 4);
    res.put(row_desc);

    res
}

/// Create a DataRow message from already-encoded cells. `None` is a NULL.
pub fn data_row_nullable(row: &[Option<BytesMut>]) -> BytesMut {
    let mut res = BytesMut::new();
    let mut data_row = BytesMut::new();

    data_row.put_i16(row.len() as i16);

    for value in row {
        match value {
            Some(value) => {
                data_row.put_i32(value.len() as i32);
                data_row.put_slice(value);
            }
            None => {
                data_row.put_i32(-1);
            }
        }
    }

    res.put_u8(b'D');
    res.put_i32(data_row.len() as i32 + 4);
    res.put(data_row);

    res
}

/// Create a CommandComplete message.
pub fn command_complete(command: &str) -> BytesMut {
    let mut res = BytesMut::new();
    res.put_u8(b'C');
    res.put_i32(command.len() as i32 + 4 + 1);
    res.put_slice(command.as_bytes());
    res.put_u8(0);
    res
}

/// Create an EmptyQueryResponse message.
pub fn empty_query_response() -> BytesMut {
    let mut bytes = BytesMut::with_capacity(5);
    bytes.put_u8(b'I');
    bytes.put_i32(4);
    bytes
}

/// Create an ErrorResponse message.
pub fn error_message(message: &str, code: &str) -> BytesMut {
    let mut error = BytesMut::new();
    // Error level
    error.put_u8(b'S');
    error.put_slice(&b"ERROR\0"[..]);
    // Error level (non-translatable)
    error.put_u8(b'V');
    error.put_slice(&b"ERROR\0"[..]);

    // SQLSTATE
    error.put_u8(b'C');
    error.put_slice(code.as_bytes());
    error.put_u8(0);

    // The short error message.
    error.put_u8(b'M');
    error.put_slice(message.as_bytes());
    error.put_u8(0);

    // No more fields follow.
    error.put_u8(0);

    let mut res = BytesMut::with_capacity(error.len() + 5);
    res.put_u8(b'E');
    res.put_i32(error.len() as i32 + 4);
    res.put(error);
    res
}

/// Create a ParseComplete message.
pub fn parse_complete() -> BytesMut {
    let mut bytes = BytesMut::with_capacity(5);
    bytes.put_u8(b'1');
    bytes.put_i32(4);
    bytes
}

/// Create a BindComplete message.
pub fn bind_complete() -> BytesMut {
    let mut bytes = BytesMut::with_capacity(5);
    bytes.put_u8(b'2');
    bytes.put_i32(4);
    bytes
}

/// Create a CloseComplete message.
pub fn close_complete() -> BytesMut {
    let mut bytes = BytesMut::with_capacity(5);
    bytes.put_u8(b'3');
    bytes.put_i32(4);
    bytes
}

/// Create a ParameterDescription message.
pub fn parameter_description(oids: &[i32]) -> BytesMut {
    let mut bytes = BytesMut::new();
    bytes.put_u8(b't');
    bytes.put_i32(4 + 2 + 4 * oids.len() as i32);
    bytes.put_i16(oids.len() as i16);
    for oid in oids {
        bytes.put_i32(*oid);
    }
    bytes
}

/// Create a NoData message.
pub fn no_data() -> BytesMut {
    let mut bytes = BytesMut::with_capacity(5);
    bytes.put_u8(b'n');
    bytes.put_i32(4);
    bytes
}

/// Create a PortalSuspended message.
pub fn portal_suspended() -> BytesMut {
    let mut bytes = BytesMut::with_capacity(5);
    bytes.put_u8(b's');
    bytes.put_i32(4);
    bytes
}
