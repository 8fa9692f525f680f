const DNA_BITMASK_A: u8 = 1;
const DNA_BITMASK_C: u8 = 2;
const DNA_BITMASK_G: u8 = 4;
const DNA_BITMASK_T: u8 = 8;
const DNA_BITMASK_ALL: u8 = DNA_BITMASK_A | DNA_BITMASK_C | DNA_BITMASK_G | DNA_BITMASK_T;

/// Column code reported when no canonical base was observed.
pub const NO_BASE_CODE: &str = "None";

/// The four canonical bases in the order report rows list them.
pub const CANONICAL_BASES: [u8; 4] = [b'A', b'T', b'G', b'C'];

/// Ambiguity letters counted as "other" symbols in a column.
pub const AMBIGUITY_LETTERS: [u8; 11] = [
    b'Y', b'R', b'W', b'S', b'K', b'M', b'D', b'V', b'H', b'B', b'N',
];

/// A bitmasked set of canonical DNA bases, eg DNA_BITMASK_A|DNA_BITMASK_G
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash)]
pub struct IupacCode(u8);

impl IupacCode {
    pub fn new(bitmask: u8) -> Self {
        Self(bitmask & DNA_BITMASK_ALL)
    }

    /// Mask of a single canonical base; anything else maps to the empty set.
    #[inline(always)]
    pub fn from_base(base: u8) -> Self {
        match base.to_ascii_uppercase() {
            b'A' => Self(DNA_BITMASK_A),
            b'C' => Self(DNA_BITMASK_C),
            b'G' => Self(DNA_BITMASK_G),
            b'T' => Self(DNA_BITMASK_T),
            _ => Self(0),
        }
    }

    /// Set of observed canonical bases in `symbols`; gaps and ambiguity
    /// letters do not contribute.
    pub fn from_observed<I>(symbols: I) -> Self
    where
        I: IntoIterator<Item = u8>,
    {
        symbols
            .into_iter()
            .fold(Self(0), |acc, s| acc.union(Self::from_base(s)))
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[inline(always)]
    pub fn is_ambiguity_letter(letter: u8) -> bool {
        AMBIGUITY_LETTERS.contains(&letter)
    }

    /// The single letter naming this base set. All four bases are reported
    /// as `X`, the empty set as [`NO_BASE_CODE`].
    pub fn symbol(&self) -> &'static str {
        const A: u8 = DNA_BITMASK_A;
        const C: u8 = DNA_BITMASK_C;
        const G: u8 = DNA_BITMASK_G;
        const T: u8 = DNA_BITMASK_T;
        match self.0 {
            0 => NO_BASE_CODE,
            A => "A",
            C => "C",
            G => "G",
            T => "T",
            x if x == C | T => "Y",
            x if x == A | G => "R",
            x if x == A | T => "W",
            x if x == G | T => "K",
            x if x == C | G => "S",
            x if x == A | C => "M",
            x if x == A | G | T => "D",
            x if x == A | C | G => "V",
            x if x == A | C | T => "H",
            x if x == C | G | T => "B",
            _ => "X",
        }
    }
}
