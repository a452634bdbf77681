//! Saving and loading of layer state.
//!
//! # `.bpst` State Format
//!
//! A `.bpst` record stores every entry of a [`Registry`], parameters and
//! buffers alike, under its name. Absent entries are stored as such, so a
//! record written by a layer without a bias can only be loaded into a layer
//! that has none either.
//!
//! ```text
//! ┌──────────────┬──────────────────────────────────────────┐
//! │ Header       │ Entry N …                                │
//! ├──────────────┼──────────────────────────────────────────┤
//! │ "bpst"[4]    │ u8: kind (0 = parameter, 1 = buffer)     │
//! │ u8: version  │ u8: present (0 / 1)                      │
//! │ u32: count   │ u16: name length, [u8] UTF-8 name        │
//! │              │ if present:                              │
//! │              │   u64: ndim, [u64; ndim] shape           │
//! │              │   [f64; prod(shape)] data                │
//! └──────────────┴──────────────────────────────────────────┘
//! ```
//!
//! All integers and floats are little-endian.
//!
//! Loading is all-or-nothing: the whole record is read and checked against
//! the registry (names, kinds, presence and shapes) before any value is
//! written. Values are written in place, so handles a caller already holds
//! observe the loaded data.
//!
//! # Example
//!
//! ```rust
//! use briny_autograd::layers::{Layer, LinearConfig};
//! use briny_autograd::modelio::{load_state, save_state};
//!
//! let source = LinearConfig::new(3, 2).init().unwrap();
//! let target = LinearConfig::new(3, 2).init().unwrap();
//! source.weight().update_(|w| w.fill(0.25));
//!
//! let mut bytes = Vec::new();
//! save_state(&mut bytes, source.registry()).unwrap();
//! load_state(&mut bytes.as_slice(), target.registry()).unwrap();
//! assert_eq!(target.weight().value().data, vec![0.25; 6]);
//! ```

use crate::error::{Error, Result};
use crate::layers::{Entry, EntryKind, Registry, Slot};
use crate::var::Var;
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

const BPST_MAGIC: &[u8; 4] = b"bpst";
const BPST_VERSION: u8 = 1;

/// Largest rank a record may declare.
const MAX_NDIM: usize = 16;

/// Writes every entry of `registry` to `writer`.
///
/// # Errors
/// [`Error::Io`] if writing fails, [`Error::Record`] if the registry holds
/// more entries or longer names than the format can express.
pub fn save_state<W: Write>(writer: &mut W, registry: &Registry) -> Result<()> {
    let entries = registry.entries();
    let count = u32::try_from(entries.len()).map_err(|_| Error::Record("too many entries".to_owned()))?;

    writer.write_all(BPST_MAGIC)?;
    writer.write_all(&[BPST_VERSION])?;
    writer.write_all(&count.to_le_bytes())?;

    for entry in entries {
        let kind = match entry.kind {
            EntryKind::Parameter => 0u8,
            EntryKind::Buffer => 1u8,
        };
        let name_len = u16::try_from(entry.name.len())
            .map_err(|_| Error::Record(format!("name `{}` is too long", entry.name)))?;

        writer.write_all(&[kind, u8::from(entry.value.is_present())])?;
        writer.write_all(&name_len.to_le_bytes())?;
        writer.write_all(entry.name.as_bytes())?;

        if let Slot::Present(var) = &entry.value {
            let value = var.value();
            writer.write_all(&(value.shape.len() as u64).to_le_bytes())?;
            for &dim in &value.shape {
                writer.write_all(&(dim as u64).to_le_bytes())?;
            }
            for &x in &value.data {
                writer.write_all(&x.to_le_bytes())?;
            }
        }
    }

    writer.flush()?;
    Ok(())
}

/// Reads a record from `reader` into the entries of `registry`.
///
/// # Errors
/// [`Error::Io`] if reading fails, [`Error::Record`] if the record is
/// malformed or doesn't match the registry. Nothing is written on error.
pub fn load_state<R: Read>(reader: &mut R, registry: &Registry) -> Result<()> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != BPST_MAGIC {
        return Err(Error::Record("invalid magic header".to_owned()));
    }
    let version = read_u8(reader)?;
    if version != BPST_VERSION {
        return Err(Error::Record(format!("unsupported version {version}")));
    }

    let count = read_u32(reader)? as usize;
    let entries = registry.entries();
    if count != entries.len() {
        return Err(Error::Record(format!(
            "record has {count} entries, registry has {}",
            entries.len()
        )));
    }

    // read and check everything before touching a single value
    let mut seen = HashSet::with_capacity(count);
    let mut writes = Vec::with_capacity(count);
    for _ in 0..count {
        if let Some(write) = read_entry(reader, entries, &mut seen)? {
            writes.push(write);
        }
    }

    for (var, data) in writes {
        var.update_(|dst| dst.copy_from_slice(&data));
    }
    log::debug!("loaded {count} state entries");
    Ok(())
}

/// Saves `registry` to a `.bpst` file at `path`.
///
/// # Errors
/// As [`save_state`].
pub fn save_state_file(path: impl AsRef<Path>, registry: &Registry) -> Result<()> {
    let mut file = BufWriter::new(File::create(path)?);
    save_state(&mut file, registry)
}

/// Loads a `.bpst` file at `path` into `registry`.
///
/// # Errors
/// As [`load_state`].
pub fn load_state_file(path: impl AsRef<Path>, registry: &Registry) -> Result<()> {
    let mut file = BufReader::new(File::open(path)?);
    load_state(&mut file, registry)
}

/// Reads one entry and matches it against its registry counterpart.
///
/// The declared shape must equal the target's before any data is buffered.
fn read_entry<'a, R: Read>(
    reader: &mut R,
    entries: &'a [Entry],
    seen: &mut HashSet<String>,
) -> Result<Option<(&'a Var, Vec<f64>)>> {
    let kind = match read_u8(reader)? {
        0 => EntryKind::Parameter,
        1 => EntryKind::Buffer,
        other => return Err(Error::Record(format!("unknown entry kind {other}"))),
    };
    let present = match read_u8(reader)? {
        0 => false,
        1 => true,
        other => return Err(Error::Record(format!("invalid presence flag {other}"))),
    };

    let mut name = vec![0u8; usize::from(read_u16(reader)?)];
    reader.read_exact(&mut name)?;
    let name = String::from_utf8(name).map_err(|_| Error::Record("entry name is not UTF-8".to_owned()))?;
    if !seen.insert(name.clone()) {
        return Err(Error::Record(format!("entry `{name}` appears twice")));
    }

    let target = entries
        .iter()
        .find(|e| e.name == name)
        .ok_or_else(|| Error::Record(format!("unknown entry `{name}`")))?;
    if target.kind != kind {
        return Err(Error::Record(format!("entry `{name}` has the wrong kind")));
    }
    let var = match (&target.value, present) {
        (Slot::Present(var), true) => var,
        (Slot::Absent, false) => return Ok(None),
        _ => return Err(Error::Record(format!("entry `{name}` differs in presence"))),
    };

    let ndim = read_len(reader)?;
    if ndim > MAX_NDIM {
        return Err(Error::Record(format!("entry `{name}` has rank {ndim}")));
    }
    let mut shape = Vec::with_capacity(ndim);
    for _ in 0..ndim {
        shape.push(read_len(reader)?);
    }
    let expected = var.shape();
    if shape != expected {
        return Err(Error::Record(format!(
            "entry `{name}` has shape {shape:?}, expected {expected:?}"
        )));
    }

    let mut buf8 = [0u8; 8];
    let mut data = Vec::with_capacity(var.numel());
    for _ in 0..var.numel() {
        reader.read_exact(&mut buf8)?;
        data.push(f64::from_le_bytes(buf8));
    }
    Ok(Some((var, data)))
}

fn read_u8<R: Read>(reader: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    reader.read_exact(&mut buf)?;
    Ok(buf[0])
}

fn read_u16<R: Read>(reader: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_len<R: Read>(reader: &mut R) -> Result<usize> {
    let mut buf = [0u8; 8];
    reader.read_exact(&mut buf)?;
    usize::try_from(u64::from_le_bytes(buf)).map_err(|_| Error::Record("length overflows usize".to_owned()))
}
