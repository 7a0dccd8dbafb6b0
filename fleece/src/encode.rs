use crate::value::Value;
use crate::{err, Result};
use ordered_float::OrderedFloat;
use std::collections::BTreeMap;

// Tag byte, one per Value variant. Not an exhaustive wire format in the
// sense real Fleece is (no pointer back-references, no narrow-int packing)
// -- just enough structure that parse/encode round-trip and a reader can
// see the shape of a document without external tooling.
const TAG_NULL: u8 = 0;
const TAG_FALSE: u8 = 1;
const TAG_TRUE: u8 = 2;
const TAG_INT: u8 = 3;
const TAG_FLOAT: u8 = 4;
const TAG_STRING: u8 = 5;
const TAG_DATA: u8 = 6;
const TAG_ARRAY: u8 = 7;
const TAG_DICT: u8 = 8;

fn write_varint(out: &mut Vec<u8>, mut v: u64) {
    loop {
        let byte = (v & 0x7f) as u8;
        v >>= 7;
        if v == 0 {
            out.push(byte);
            break;
        } else {
            out.push(byte | 0x80);
        }
    }
}

fn read_varint(buf: &[u8], pos: &mut usize) -> Result<u64> {
    let mut result: u64 = 0;
    let mut shift = 0;
    loop {
        let byte = *buf
            .get(*pos)
            .ok_or_else(|| err("truncated varint in fleece body"))?;
        *pos += 1;
        result |= ((byte & 0x7f) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift > 63 {
            return Err(err("varint too long"));
        }
    }
}

fn zigzag_encode(v: i64) -> u64 {
    ((v << 1) ^ (v >> 63)) as u64
}
fn zigzag_decode(v: u64) -> i64 {
    ((v >> 1) as i64) ^ -((v & 1) as i64)
}

fn write_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_varint(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

fn read_bytes<'a>(buf: &'a [u8], pos: &mut usize) -> Result<&'a [u8]> {
    let len = read_varint(buf, pos)? as usize;
    let end = pos
        .checked_add(len)
        .ok_or_else(|| err("fleece body length overflow"))?;
    let slice = buf
        .get(*pos..end)
        .ok_or_else(|| err("truncated byte string in fleece body"))?;
    *pos = end;
    Ok(slice)
}

fn write_value(out: &mut Vec<u8>, v: &Value) {
    match v {
        Value::Null => out.push(TAG_NULL),
        Value::Bool(false) => out.push(TAG_FALSE),
        Value::Bool(true) => out.push(TAG_TRUE),
        Value::Int(i) => {
            out.push(TAG_INT);
            write_varint(out, zigzag_encode(*i));
        }
        Value::Float(f) => {
            out.push(TAG_FLOAT);
            out.extend_from_slice(&f.0.to_le_bytes());
        }
        Value::String(s) => {
            out.push(TAG_STRING);
            write_bytes(out, s.as_bytes());
        }
        Value::Data(d) => {
            out.push(TAG_DATA);
            write_bytes(out, d);
        }
        Value::Array(a) => {
            out.push(TAG_ARRAY);
            write_varint(out, a.len() as u64);
            for item in a {
                write_value(out, item);
            }
        }
        Value::Dict(d) => {
            out.push(TAG_DICT);
            write_varint(out, d.len() as u64);
            for (k, val) in d {
                write_bytes(out, k.as_bytes());
                write_value(out, val);
            }
        }
    }
}

fn read_value(buf: &[u8], pos: &mut usize) -> Result<Value> {
    let tag = *buf
        .get(*pos)
        .ok_or_else(|| err("truncated tag in fleece body"))?;
    *pos += 1;
    match tag {
        TAG_NULL => Ok(Value::Null),
        TAG_FALSE => Ok(Value::Bool(false)),
        TAG_TRUE => Ok(Value::Bool(true)),
        TAG_INT => Ok(Value::Int(zigzag_decode(read_varint(buf, pos)?))),
        TAG_FLOAT => {
            let bytes = buf
                .get(*pos..*pos + 8)
                .ok_or_else(|| err("truncated float in fleece body"))?;
            *pos += 8;
            let arr: [u8; 8] = bytes.try_into().unwrap();
            Ok(Value::Float(OrderedFloat(f64::from_le_bytes(arr))))
        }
        TAG_STRING => {
            let bytes = read_bytes(buf, pos)?;
            Ok(Value::String(
                String::from_utf8(bytes.to_vec()).map_err(|_| err("invalid utf8 in string"))?,
            ))
        }
        TAG_DATA => Ok(Value::Data(read_bytes(buf, pos)?.to_vec())),
        TAG_ARRAY => {
            let len = read_varint(buf, pos)?;
            let mut items = Vec::with_capacity(len as usize);
            for _ in 0..len {
                items.push(read_value(buf, pos)?);
            }
            Ok(Value::Array(items))
        }
        TAG_DICT => {
            let len = read_varint(buf, pos)?;
            let mut map = BTreeMap::new();
            for _ in 0..len {
                let key = read_bytes(buf, pos)?;
                let key =
                    String::from_utf8(key.to_vec()).map_err(|_| err("invalid utf8 in key"))?;
                let val = read_value(buf, pos)?;
                map.insert(key, val);
            }
            Ok(Value::Dict(map))
        }
        _ => Err(err("unknown fleece tag")),
    }
}

/// Encodes a value tree to the tag-prefixed binary form documents are
/// stored in.
pub fn encode(v: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_value(&mut out, v);
    out
}

/// Parses trusted bytes (already validated by the storage engine on write)
/// into a value tree. Returns an error on truncation or an unrecognized
/// tag rather than panicking, since a corrupted blob should surface as a
/// local-DB-I/O-class error, not an assertion failure.
pub fn decode(bytes: &[u8]) -> Result<Value> {
    let mut pos = 0;
    let v = read_value(bytes, &mut pos)?;
    if pos != bytes.len() {
        return Err(err("trailing bytes after fleece value"));
    }
    Ok(v)
}
