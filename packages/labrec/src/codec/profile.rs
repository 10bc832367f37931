//! Profile codecs.
//!
//! A profile row is a 2-column array of `u16` cells. The first four cells
//! carry the sample time (the `f64` bit pattern split into four words),
//! then coordinate pairs follow.
//!
//! The cumulative variant stores only the first point absolutely. Every
//! later point must be a unit step away from its predecessor on each axis;
//! a step `(dx, dy)` with `dx, dy ∈ {-1, 0, 1}` becomes the base-9 symbol
//! `(dx + 1) * 3 + (dy + 1)` and two symbols share a byte as `a * 9 + b`.
//! An odd trailing symbol is written as the sentinel byte `81 + a`.
//!
//! ```text
//! [time: 4 × u16 LE][x0: u16][y0: u16][packed steps ...]
//! ```

/// Bytes used by the time words.
const TIME_SIZE: usize = 8;

/// Symbol base: 3 states per axis, 2 axes.
const BASE: u8 = 9;

/// First sentinel byte; `PAD_SENTINEL + a` holds a lone trailing symbol.
const PAD_SENTINEL: u8 = BASE * BASE;

/// Axis bias: step `-1` maps to symbol digit `0`.
const BIAS: i32 = 1;

pub fn time_to_words(t: f64) -> [u16; 4] {
    let bits = t.to_bits();
    [
        bits as u16,
        (bits >> 16) as u16,
        (bits >> 32) as u16,
        (bits >> 48) as u16,
    ]
}

pub fn words_to_time(words: [u16; 4]) -> f64 {
    let bits = words[0] as u64
        | (words[1] as u64) << 16
        | (words[2] as u64) << 32
        | (words[3] as u64) << 48;
    f64::from_bits(bits)
}

fn write_time(row: &mut Vec<u8>, t: f64) {
    for w in time_to_words(t) {
        row.extend_from_slice(&w.to_le_bytes());
    }
}

fn read_u16(bytes: &[u8], offset: usize) -> Option<u16> {
    let raw: [u8; 2] = bytes.get(offset..offset + 2)?.try_into().ok()?;
    Some(u16::from_le_bytes(raw))
}

pub(crate) fn read_time_words(bytes: &[u8]) -> Option<f64> {
    Some(words_to_time([
        read_u16(bytes, 0)?,
        read_u16(bytes, 2)?,
        read_u16(bytes, 4)?,
        read_u16(bytes, 6)?,
    ]))
}

// ── Absolute profile ───────────────────────────────────────────────

pub fn encode_profile(t: f64, points: &[[u16; 2]]) -> Option<Vec<u8>> {
    let mut row = Vec::with_capacity(TIME_SIZE + points.len() * 4);
    write_time(&mut row, t);
    for [x, y] in points {
        row.extend_from_slice(&x.to_le_bytes());
        row.extend_from_slice(&y.to_le_bytes());
    }
    Some(row)
}

pub fn decode_profile(bytes: &[u8]) -> Option<(f64, Vec<[u16; 2]>)> {
    if bytes.len() < TIME_SIZE || (bytes.len() - TIME_SIZE) % 4 != 0 {
        return None;
    }
    let t = read_time_words(bytes)?;
    let points = bytes[TIME_SIZE..]
        .chunks_exact(4)
        .map(|c| [u16::from_le_bytes([c[0], c[1]]), u16::from_le_bytes([c[2], c[3]])])
        .collect();
    Some((t, points))
}

// ── Cumulative profile ─────────────────────────────────────────────

fn step_symbol(from: [u16; 2], to: [u16; 2]) -> Option<u8> {
    let dx = to[0] as i32 - from[0] as i32;
    let dy = to[1] as i32 - from[1] as i32;
    if dx.abs() > 1 || dy.abs() > 1 {
        return None;
    }
    Some(((dx + BIAS) * 3 + (dy + BIAS)) as u8)
}

fn symbol_step(symbol: u8) -> (i32, i32) {
    let s = symbol as i32;
    (s / 3 - BIAS, s % 3 - BIAS)
}

/// Pack base-9 step symbols two per byte.
pub fn pack_symbols(symbols: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(symbols.len() / 2 + 1);
    let mut pairs = symbols.chunks_exact(2);
    for pair in &mut pairs {
        out.push(pair[0] * BASE + pair[1]);
    }
    if let [last] = pairs.remainder() {
        out.push(PAD_SENTINEL + last);
    }
    out
}

/// Inverse of [`pack_symbols`]. `None` on out-of-range bytes or a
/// sentinel anywhere but the last position.
pub fn unpack_symbols(packed: &[u8]) -> Option<Vec<u8>> {
    let mut symbols = Vec::with_capacity(packed.len() * 2);
    for (i, &byte) in packed.iter().enumerate() {
        if byte < PAD_SENTINEL {
            symbols.push(byte / BASE);
            symbols.push(byte % BASE);
        } else if byte < PAD_SENTINEL + BASE && i == packed.len() - 1 {
            symbols.push(byte - PAD_SENTINEL);
        } else {
            return None;
        }
    }
    Some(symbols)
}

pub fn encode_cumulative(t: f64, points: &[[u16; 2]]) -> Option<Vec<u8>> {
    let mut row = Vec::with_capacity(TIME_SIZE + 4 + points.len() / 2 + 1);
    write_time(&mut row, t);
    let Some(&origin) = points.first() else {
        return Some(row);
    };
    row.extend_from_slice(&origin[0].to_le_bytes());
    row.extend_from_slice(&origin[1].to_le_bytes());

    let symbols = points
        .windows(2)
        .map(|w| step_symbol(w[0], w[1]))
        .collect::<Option<Vec<u8>>>()?;
    row.extend(pack_symbols(&symbols));
    Some(row)
}

pub fn decode_cumulative(bytes: &[u8]) -> Option<(f64, Vec<[u16; 2]>)> {
    let t = read_time_words(bytes)?;
    if bytes.len() == TIME_SIZE {
        return Some((t, Vec::new()));
    }
    let x0 = read_u16(bytes, TIME_SIZE)?;
    let y0 = read_u16(bytes, TIME_SIZE + 2)?;
    let symbols = unpack_symbols(&bytes[TIME_SIZE + 4..])?;

    let mut points = Vec::with_capacity(symbols.len() + 1);
    points.push([x0, y0]);
    let (mut x, mut y) = (x0 as i32, y0 as i32);
    for symbol in symbols {
        let (dx, dy) = symbol_step(symbol);
        x += dx;
        y += dy;
        points.push([u16::try_from(x).ok()?, u16::try_from(y).ok()?]);
    }
    Some((t, points))
}
