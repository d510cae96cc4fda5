// src/core/backend/startup.rs

//! Builds the version-3 startup packet and the `StartupRecord` that
//! describes it, mirroring `make_persistent_db_connection`'s packet
//! assembly in the original pgpool implementation (see
//! `examples/original_source/src/protocol/pool_pg_utils.c`).

use crate::core::errors::{PoolError, StartupField};
use bytes::{Bytes, BytesMut};

/// The fixed size of the startup parameter buffer. Preserved from the
/// original `MAX_USER_AND_DATABASE` constant.
pub const MAX_STARTUP_PACKET_LEN: usize = 1024;

/// Protocol version 3.0, network-order-encoded as `0x00030000`.
pub const PROTOCOL_VERSION_3_0: u32 = 0x0003_0000;

/// Accumulates NUL-terminated `key\0value\0` pairs into a fixed-size buffer,
/// rejecting an overflowing pair atomically rather than the original's
/// incremental `snprintf`-and-check-afterwards style (see SPEC_FULL.md §9,
/// "Buffered startup construction").
pub struct StartupPacketBuilder {
    buf: BytesMut,
    cap: usize,
}

impl StartupPacketBuilder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(MAX_STARTUP_PACKET_LEN),
            cap: MAX_STARTUP_PACKET_LEN,
        }
    }

    /// Appends `key\0value\0`, failing with `StartupTooLong(field)` if doing
    /// so would exceed the fixed-size buffer.
    pub fn write_pair(&mut self, field: StartupField, key: &str, value: &str) -> Result<(), PoolError> {
        let needed = key.len() + 1 + value.len() + 1;
        if self.buf.len() + needed > self.cap {
            return Err(PoolError::StartupTooLong(field));
        }
        self.buf.extend_from_slice(key.as_bytes());
        self.buf.extend_from_slice(b"\0");
        self.buf.extend_from_slice(value.as_bytes());
        self.buf.extend_from_slice(b"\0");
        Ok(())
    }

    /// Appends the final NUL sentinel that terminates the parameter list.
    pub fn finish(mut self) -> Result<Bytes, PoolError> {
        if self.buf.len() + 1 > self.cap {
            // The sentinel itself cannot overflow in practice (the database
            // pair check above leaves at least one byte of slack whenever it
            // succeeds), but the check is kept for defensiveness against a
            // future caller adding more pairs.
            return Err(PoolError::StartupTooLong(StartupField::Database));
        }
        self.buf.extend_from_slice(b"\0");
        Ok(self.buf.freeze())
    }
}

impl Default for StartupPacketBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The parameters sent to the backend during startup, retained for the
/// lifetime of the `Slot` (SPEC_FULL.md §3, "StartupRecord").
#[derive(Debug, Clone)]
pub struct StartupRecord {
    /// The fully serialised NUL-terminated key/value payload (excludes the
    /// 4-byte length prefix and the 4-byte protocol version).
    pub raw_packet: Bytes,
    /// `raw_packet.len()`, cached for convenience.
    pub packet_len: usize,
    pub protocol_major: u16,
    pub protocol_minor: u16,
    pub database: String,
    pub user: String,
    /// Consumed by the selector, not written to the wire for persistent
    /// (administrative) connections.
    pub application_name: Option<String>,
}

impl StartupRecord {
    /// Builds the startup payload `"user\0<user>\0database\0<dbname>\0\0"`
    /// and the accompanying `StartupRecord`, in the exact key order required
    /// by SPEC_FULL.md §4.1 step 6.
    pub fn build(dbname: &str, user: &str) -> Result<Self, PoolError> {
        let mut builder = StartupPacketBuilder::new();
        builder.write_pair(StartupField::User, "user", user)?;
        builder.write_pair(StartupField::Database, "database", dbname)?;
        let raw_packet = builder.finish()?;
        let packet_len = raw_packet.len();

        Ok(Self {
            raw_packet,
            packet_len,
            protocol_major: 3,
            protocol_minor: 0,
            database: dbname.to_string(),
            user: user.to_string(),
            application_name: None,
        })
    }

    /// The 4-byte big-endian length prefix value: inclusive of itself, the
    /// 4-byte protocol version, and the serialised payload (SPEC_FULL.md §6).
    pub fn wire_length_prefix(&self) -> u32 {
        (4 + 4 + self.packet_len) as u32
    }
}
