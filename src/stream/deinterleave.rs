//! Channel de-interleaving of the synchronized capture stream

use std::io::{self, Read};
use tracing::{debug, trace};

use super::SENTINEL;

/// Which channel the next sample word belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parity {
    Left,
    Right,
}

impl Parity {
    fn flip(self) -> Self {
        match self {
            Parity::Left => Parity::Right,
            Parity::Right => Parity::Left,
        }
    }
}

/// One stereo frame of raw capture words
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplePair {
    pub left: u16,
    pub right: u16,
}

impl SamplePair {
    pub fn new(left: u16, right: u16) -> Self {
        Self { left, right }
    }
}

/// Outcome of feeding one two-byte unit to the de-interleaver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Unit was a sentinel; parity and buffer untouched
    Skip,
    /// Word stored as the left half of the next pair
    BufferLeft(u16),
    /// Right half arrived, pair complete
    EmitPair(SamplePair),
}

/// Parity state machine, free of any I/O
#[derive(Debug, Clone)]
pub struct Deinterleaver {
    parity: Parity,
    left: u16,
    sentinels: u64,
    words: u64,
}

impl Deinterleaver {
    pub fn new() -> Self {
        Self {
            parity: Parity::Left,
            left: 0,
            sentinels: 0,
            words: 0,
        }
    }

    /// Advance the state machine by one two-byte unit.
    ///
    /// A sentinel arriving between a left and a right word leaves the left
    /// word buffered, so the pair is spliced across the packet boundary.
    /// A word whose value is `0xFFFF` can never be told apart from a sentinel
    /// and is always dropped.
    pub fn feed(&mut self, unit: [u8; 2]) -> Decision {
        if unit == SENTINEL {
            self.sentinels += 1;
            return Decision::Skip;
        }

        let word = u16::from_le_bytes(unit);
        self.words += 1;

        match self.parity {
            Parity::Left => {
                self.left = word;
                self.parity = self.parity.flip();
                Decision::BufferLeft(word)
            }
            Parity::Right => {
                self.parity = self.parity.flip();
                Decision::EmitPair(SamplePair::new(self.left, word))
            }
        }
    }

    /// Channel expected for the next non-sentinel word
    pub fn parity(&self) -> Parity {
        self.parity
    }

    /// Sentinel units dropped so far
    pub fn sentinels(&self) -> u64 {
        self.sentinels
    }

    /// Sample words decoded so far (sentinels excluded)
    pub fn words(&self) -> u64 {
        self.words
    }
}

impl Default for Deinterleaver {
    fn default() -> Self {
        Self::new()
    }
}

/// Lazy sequence of sample pairs over a synchronized reader.
///
/// Ends at the first short read; a trailing partial word or an unpaired left
/// word is dropped. Not restartable: the reader is consumed as pairs are
/// pulled.
pub struct Decoder<R> {
    reader: R,
    state: Deinterleaver,
    finished: bool,
    truncated: bool,
}

impl<R: Read> Decoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            state: Deinterleaver::new(),
            finished: false,
            truncated: false,
        }
    }

    /// State machine counters
    pub fn state(&self) -> &Deinterleaver {
        &self.state
    }

    /// Whether the stream ended with a partial word or an unpaired left word
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Read exactly two bytes, or `None` if the stream ends first
    fn read_unit(&mut self) -> io::Result<Option<[u8; 2]>> {
        let mut unit = [0u8; 2];
        let mut filled = 0;

        while filled < unit.len() {
            match self.reader.read(&mut unit[filled..]) {
                Ok(0) => {
                    if filled > 0 {
                        debug!("Dropping trailing partial word ({:02X})", unit[0]);
                        self.truncated = true;
                    }
                    return Ok(None);
                }
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }

        Ok(Some(unit))
    }
}

impl<R: Read> Iterator for Decoder<R> {
    type Item = io::Result<SamplePair>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        loop {
            let unit = match self.read_unit() {
                Ok(Some(unit)) => unit,
                Ok(None) => {
                    self.finished = true;
                    if self.state.parity() == Parity::Right {
                        debug!("Stream ended with an unpaired left word");
                        self.truncated = true;
                    }
                    return None;
                }
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            };

            match self.state.feed(unit) {
                Decision::Skip => trace!("Sentinel skipped"),
                Decision::BufferLeft(word) => trace!("Left word {:04X} buffered", word),
                Decision::EmitPair(pair) => return Some(Ok(pair)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn decode_all(bytes: &[u8]) -> Vec<SamplePair> {
        Decoder::new(Cursor::new(bytes.to_vec()))
            .collect::<io::Result<Vec<_>>>()
            .unwrap()
    }

    #[test]
    fn test_feed_alternates_parity() {
        let mut state = Deinterleaver::new();
        assert_eq!(state.parity(), Parity::Left);
        assert_eq!(state.feed([0x34, 0x12]), Decision::BufferLeft(0x1234));
        assert_eq!(state.parity(), Parity::Right);
        assert_eq!(
            state.feed([0x78, 0x56]),
            Decision::EmitPair(SamplePair::new(0x1234, 0x5678))
        );
        assert_eq!(state.parity(), Parity::Left);
        assert_eq!(state.words(), 2);
    }

    #[test]
    fn test_feed_sentinel_keeps_state() {
        let mut state = Deinterleaver::new();
        assert_eq!(state.feed([0xFF, 0xFF]), Decision::Skip);
        assert_eq!(state.parity(), Parity::Left);

        state.feed([0x01, 0x00]);
        assert_eq!(state.feed([0xFF, 0xFF]), Decision::Skip);
        assert_eq!(state.parity(), Parity::Right);
        assert_eq!(
            state.feed([0x02, 0x00]),
            Decision::EmitPair(SamplePair::new(1, 2))
        );
        assert_eq!(state.sentinels(), 2);
        assert_eq!(state.words(), 2);
    }

    #[test]
    fn test_feed_single_marker_is_data() {
        let mut state = Deinterleaver::new();
        assert_eq!(state.feed([0xFF, 0x0F]), Decision::BufferLeft(0x0FFF));
        assert_eq!(
            state.feed([0x00, 0xFF]),
            Decision::EmitPair(SamplePair::new(0x0FFF, 0xFF00))
        );
        assert_eq!(state.sentinels(), 0);
    }

    #[test]
    fn test_decode_in_order() {
        let words: Vec<u16> = (0..20).map(|i| 0x0100 + i * 3).collect();
        let bytes: Vec<u8> = words.iter().flat_map(|w| w.to_le_bytes()).collect();

        let pairs = decode_all(&bytes);
        assert_eq!(pairs.len(), 10);
        for (i, pair) in pairs.iter().enumerate() {
            assert_eq!(*pair, SamplePair::new(words[2 * i], words[2 * i + 1]));
        }
    }

    #[test]
    fn test_decode_splices_across_sentinel() {
        // left=0x0AAA | sentinel | right=0x0BBB
        let bytes = hex::decode("AA0AFFFFBB0B").unwrap();
        let mut decoder = Decoder::new(Cursor::new(bytes));
        let pair = decoder.next().unwrap().unwrap();
        assert_eq!(pair, SamplePair::new(0x0AAA, 0x0BBB));
        assert!(decoder.next().is_none());
        assert_eq!(decoder.state().sentinels(), 1);
    }

    #[test]
    fn test_decode_trailing_byte() {
        let bytes = hex::decode("0100020003").unwrap();
        let mut decoder = Decoder::new(Cursor::new(bytes));
        assert_eq!(decoder.next().unwrap().unwrap(), SamplePair::new(1, 2));
        assert!(decoder.next().is_none());
        assert!(decoder.truncated());
        // Fused after the end
        assert!(decoder.next().is_none());
    }

    #[test]
    fn test_decode_unpaired_left() {
        let bytes = hex::decode("010002000300").unwrap();
        let mut decoder = Decoder::new(Cursor::new(bytes));
        assert_eq!(decoder.by_ref().count(), 1);
        assert!(decoder.truncated());
    }

    #[test]
    fn test_decode_only_sentinels() {
        let pairs = decode_all(&hex::decode("FFFFFFFFFFFF").unwrap());
        assert!(pairs.is_empty());
    }

    #[test]
    fn test_decode_read_error() {
        struct Failing;
        impl Read for Failing {
            fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
                Err(io::Error::new(io::ErrorKind::BrokenPipe, "gone"))
            }
        }

        let mut decoder = Decoder::new(Failing);
        assert!(decoder.next().unwrap().is_err());
        assert!(decoder.next().is_none());
    }

    #[test]
    fn test_decode_one_byte_reads() {
        // Reader handing out one byte at a time still yields whole words
        struct Trickle(Cursor<Vec<u8>>);
        impl Read for Trickle {
            fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
                let len = buf.len().min(1);
                self.0.read(&mut buf[..len])
            }
        }

        let bytes = hex::decode("00100020FFFF00300040").unwrap();
        let pairs: Vec<_> = Decoder::new(Trickle(Cursor::new(bytes)))
            .map(Result::unwrap)
            .collect();
        assert_eq!(
            pairs,
            vec![SamplePair::new(0x1000, 0x2000), SamplePair::new(0x3000, 0x4000)]
        );
    }
}
