//! Gap-affine wavefront alignment.
//!
//! Computes an optimal global alignment between two canonical DNA slices
//! in O(ns) time, where s is the optimal penalty. Matches cost 0;
//! mismatches and gaps carry positive penalties, so wavefronts advance by
//! increasing penalty score until the terminal diagonal is reached.
//!
//! Convention: offset `h` counts query characters consumed, diagonal
//! `k = h - j` where `j` indexes the target. `I` consumes a query base
//! (diagonal up), `D` consumes a target base (diagonal down).

/// Affine penalty set. All values are positive costs; matches are free.
#[derive(Debug, Clone, Copy)]
pub struct Penalties {
    pub mismatch: u32,
    pub gap_opening: u32,
    pub gap_extension: u32,
}

/// Run-length encoded alignment path. Ops are `=`, `X`, `I`, `D`.
pub type Cigar = Vec<(u32, u8)>;

/// A completed alignment: the optimal penalty and its edit script.
#[derive(Debug, Clone)]
pub struct Alignment {
    pub score: u32,
    pub cigar: Cigar,
}

const NULL_OFFSET: i32 = -1;

#[derive(Debug, Clone)]
struct Wavefront {
    lo: i32,
    hi: i32,
    offsets: Vec<i32>,
}

impl Wavefront {
    fn new(lo: i32, hi: i32) -> Self {
        Wavefront {
            lo,
            hi,
            offsets: vec![NULL_OFFSET; (hi - lo + 1).max(0) as usize],
        }
    }

    #[inline]
    fn get(&self, k: i32) -> i32 {
        if k < self.lo || k > self.hi {
            return NULL_OFFSET;
        }
        self.offsets[(k - self.lo) as usize]
    }

    #[inline]
    fn set(&mut self, k: i32, offset: i32) {
        if k >= self.lo && k <= self.hi {
            self.offsets[(k - self.lo) as usize] = offset;
        }
    }
}

/// Backtrace source of an M-wavefront cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MSource {
    Mismatch,
    FromI,
    FromD,
}

/// Backtrace source of a gap-wavefront cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GapSource {
    Open,
    Extend,
}

/// One penalty-score level: the three wavefronts plus backtrace sources.
#[derive(Debug, Clone)]
struct ScoreLevel {
    m: Option<Wavefront>,
    i: Option<Wavefront>,
    d: Option<Wavefront>,
    lo: i32,
    m_src: Vec<Option<MSource>>,
    i_src: Vec<Option<GapSource>>,
    d_src: Vec<Option<GapSource>>,
}

impl ScoreLevel {
    fn new(lo: i32, hi: i32) -> Self {
        let width = (hi - lo + 1).max(0) as usize;
        ScoreLevel {
            m: None,
            i: None,
            d: None,
            lo,
            m_src: vec![None; width],
            i_src: vec![None; width],
            d_src: vec![None; width],
        }
    }

    #[inline]
    fn idx(&self, k: i32) -> usize {
        (k - self.lo) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    M,
    I,
    D,
}

/// Global gap-affine alignment of `query` against `target`.
///
/// Returns `None` for empty inputs or when the optimal penalty would
/// exceed `max_score` (the caller treats that as alignment failure).
pub fn align_affine(
    query: &[u8],
    target: &[u8],
    penalties: &Penalties,
    max_score: Option<u32>,
) -> Option<Alignment> {
    let n = query.len();
    let m = target.len();
    if n == 0 || m == 0 {
        return None;
    }

    let x = penalties.mismatch;
    let o = penalties.gap_opening;
    let e = penalties.gap_extension;
    let oe = o + e;

    let final_k = n as i32 - m as i32;
    let final_h = n as i32;

    // Worst case is all-mismatch plus one run of gaps for the length
    // difference; the optimum can never cost more.
    let natural_bound = x * n.min(m) as u32 + o + e * n.abs_diff(m) as u32 + 1;
    let cap = match max_score {
        Some(limit) => limit.min(natural_bound),
        None => natural_bound,
    };

    let mut levels: Vec<Option<ScoreLevel>> = Vec::with_capacity(64);

    // Score 0: one diagonal, extended along the initial match run.
    let mut m0 = Wavefront::new(0, 0);
    m0.set(0, 0);
    extend(&mut m0, query, target);
    let reached = m0.get(final_k) >= final_h;
    let mut level0 = ScoreLevel::new(0, 0);
    level0.m = Some(m0);
    levels.push(Some(level0));
    if reached {
        return backtrace(query, &levels, 0, final_k, penalties);
    }

    for s in 1..=cap {
        let (lo, hi) = diagonal_range(s, &levels, x, oe, e);
        if lo > hi {
            levels.push(None);
            continue;
        }
        let mut level = ScoreLevel::new(lo, hi);

        // I: gap in the target, consumes a query base, diagonal up.
        let mut i_wf = Wavefront::new(lo, hi);
        for k in lo..=hi {
            let open = m_offset(&levels, s, oe, k - 1);
            let extend_ = i_offset(&levels, s, e, k - 1);
            let (best, src) = if open >= extend_ {
                (open, GapSource::Open)
            } else {
                (extend_, GapSource::Extend)
            };
            if best != NULL_OFFSET {
                i_wf.set(k, best + 1);
                let idx = level.idx(k);
                level.i_src[idx] = Some(src);
            }
        }

        // D: gap in the query, consumes a target base, diagonal down.
        let mut d_wf = Wavefront::new(lo, hi);
        for k in lo..=hi {
            let open = m_offset(&levels, s, oe, k + 1);
            let extend_ = d_offset(&levels, s, e, k + 1);
            let (best, src) = if open >= extend_ {
                (open, GapSource::Open)
            } else {
                (extend_, GapSource::Extend)
            };
            if best != NULL_OFFSET {
                d_wf.set(k, best);
                let idx = level.idx(k);
                level.d_src[idx] = Some(src);
            }
        }

        // M: best of mismatch, I and D, then extended along matches.
        // A candidate can overshoot the sequence ends when it comes from
        // a longer neighboring diagonal; such cells are not usable.
        let in_bounds = |h: i32, k: i32| h <= final_h && h - k >= 0 && h - k <= m as i32;
        let mut m_wf = Wavefront::new(lo, hi);
        for k in lo..=hi {
            let mut best = NULL_OFFSET;
            let mut src = None;

            let mismatch = m_offset(&levels, s, x, k);
            if mismatch != NULL_OFFSET && in_bounds(mismatch + 1, k) {
                best = mismatch + 1;
                src = Some(MSource::Mismatch);
            }
            let from_i = i_wf.get(k);
            if from_i != NULL_OFFSET && from_i > best && in_bounds(from_i, k) {
                best = from_i;
                src = Some(MSource::FromI);
            }
            let from_d = d_wf.get(k);
            if from_d != NULL_OFFSET && from_d > best && in_bounds(from_d, k) {
                best = from_d;
                src = Some(MSource::FromD);
            }

            if let Some(src) = src {
                m_wf.set(k, best);
                let idx = level.idx(k);
                level.m_src[idx] = Some(src);
            }
        }
        extend(&mut m_wf, query, target);

        let reached = m_wf.get(final_k) >= final_h;
        level.m = Some(m_wf);
        level.i = Some(i_wf);
        level.d = Some(d_wf);
        levels.push(Some(level));

        if reached {
            return backtrace(query, &levels, s, final_k, penalties);
        }
    }

    None
}

/// Advance every diagonal of an M wavefront along matching characters.
fn extend(wf: &mut Wavefront, query: &[u8], target: &[u8]) {
    let n = query.len() as i32;
    let m = target.len() as i32;
    for k in wf.lo..=wf.hi {
        let idx = (k - wf.lo) as usize;
        let mut h = wf.offsets[idx];
        if h == NULL_OFFSET {
            continue;
        }
        loop {
            let j = h - k;
            if h >= n || j < 0 || j >= m {
                break;
            }
            if query[h as usize] != target[j as usize] {
                break;
            }
            h += 1;
        }
        wf.offsets[idx] = h;
    }
}

/// Diagonal span contributing to score `s`, over-approximated by one cell
/// on each side of every predecessor level.
fn diagonal_range(s: u32, levels: &[Option<ScoreLevel>], x: u32, oe: u32, e: u32) -> (i32, i32) {
    let mut lo = i32::MAX;
    let mut hi = i32::MIN;
    for delta in [x, oe, e] {
        if s < delta {
            continue;
        }
        if let Some(Some(level)) = levels.get((s - delta) as usize) {
            for wf in [&level.m, &level.i, &level.d].into_iter().flatten() {
                lo = lo.min(wf.lo - 1);
                hi = hi.max(wf.hi + 1);
            }
        }
    }
    (lo, hi)
}

fn m_offset(levels: &[Option<ScoreLevel>], s: u32, delta: u32, k: i32) -> i32 {
    if s < delta {
        return NULL_OFFSET;
    }
    match levels.get((s - delta) as usize) {
        Some(Some(level)) => level.m.as_ref().map_or(NULL_OFFSET, |wf| wf.get(k)),
        _ => NULL_OFFSET,
    }
}

fn i_offset(levels: &[Option<ScoreLevel>], s: u32, delta: u32, k: i32) -> i32 {
    if s < delta {
        return NULL_OFFSET;
    }
    match levels.get((s - delta) as usize) {
        Some(Some(level)) => level.i.as_ref().map_or(NULL_OFFSET, |wf| wf.get(k)),
        _ => NULL_OFFSET,
    }
}

fn d_offset(levels: &[Option<ScoreLevel>], s: u32, delta: u32, k: i32) -> i32 {
    if s < delta {
        return NULL_OFFSET;
    }
    match levels.get((s - delta) as usize) {
        Some(Some(level)) => level.d.as_ref().map_or(NULL_OFFSET, |wf| wf.get(k)),
        _ => NULL_OFFSET,
    }
}

/// Walk the recorded sources back from the terminal cell to (0,0),
/// emitting the edit script in reverse.
fn backtrace(
    query: &[u8],
    levels: &[Option<ScoreLevel>],
    final_score: u32,
    final_k: i32,
    penalties: &Penalties,
) -> Option<Alignment> {
    let x = penalties.mismatch;
    let e = penalties.gap_extension;
    let oe = penalties.gap_opening + e;

    let mut ops: Vec<u8> = Vec::with_capacity(2 * query.len());
    let mut s = final_score;
    let mut k = final_k;
    let mut state = State::M;
    let mut h = m_offset(levels, s, 0, k);
    if h < query.len() as i32 {
        return None;
    }
    h = query.len() as i32;

    loop {
        let level = levels.get(s as usize)?.as_ref()?;
        match state {
            State::M => {
                if s == 0 {
                    // Only the initial match run remains.
                    for _ in 0..h {
                        ops.push(b'=');
                    }
                    h = 0;
                    break;
                }
                let src = *level.m_src.get(level.idx(k))?;
                match src? {
                    MSource::Mismatch => {
                        let prev = m_offset(levels, s, x, k);
                        for _ in 0..(h - prev - 1) {
                            ops.push(b'=');
                        }
                        ops.push(b'X');
                        s -= x;
                        h = prev;
                    }
                    MSource::FromI => {
                        let v = level.i.as_ref()?.get(k);
                        for _ in 0..(h - v) {
                            ops.push(b'=');
                        }
                        h = v;
                        state = State::I;
                    }
                    MSource::FromD => {
                        let v = level.d.as_ref()?.get(k);
                        for _ in 0..(h - v) {
                            ops.push(b'=');
                        }
                        h = v;
                        state = State::D;
                    }
                }
            }
            State::I => {
                let src = *level.i_src.get(level.idx(k))?;
                ops.push(b'I');
                h -= 1;
                k -= 1;
                match src? {
                    GapSource::Open => {
                        s -= oe;
                        state = State::M;
                    }
                    GapSource::Extend => {
                        s -= e;
                    }
                }
            }
            State::D => {
                let src = *level.d_src.get(level.idx(k))?;
                ops.push(b'D');
                k += 1;
                match src? {
                    GapSource::Open => {
                        s -= oe;
                        state = State::M;
                    }
                    GapSource::Extend => {
                        s -= e;
                    }
                }
            }
        }
    }

    if h != 0 || k != 0 {
        return None;
    }

    ops.reverse();
    Some(Alignment {
        score: final_score,
        cigar: run_length_encode(&ops),
    })
}

fn run_length_encode(ops: &[u8]) -> Cigar {
    let mut cigar = Cigar::new();
    for &op in ops {
        match cigar.last_mut() {
            Some((count, last)) if *last == op => *count += 1,
            _ => cigar.push((1, op)),
        }
    }
    cigar
}
