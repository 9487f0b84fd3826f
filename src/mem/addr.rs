use crate::mem::config::ConfigError;
use log::warn;
use std::fmt::{self, Display, Formatter};

/// Decoded (channel, rank, bank, row, column, sub-array) tuple together with
/// the flat physical address it came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MemAddr {
    pub phys: u64,
    pub row: usize,
    pub col: usize,
    pub bank: usize,
    pub rank: usize,
    pub channel: usize,
    pub subarray: usize,
}

impl Display for MemAddr {
    fn fmt(&self, fmt: &mut Formatter) -> fmt::Result {
        write!(
            fmt,
            "0x{:x} (ch {}, rk {}, bk {}, row {}, col {}, sa {})",
            self.phys, self.channel, self.rank, self.bank, self.row, self.col, self.subarray
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    Row = 0,
    Col = 1,
    Bank = 2,
    Rank = 3,
    Channel = 4,
}

const FIELD_COUNT: usize = 5;
const FIELDS: [Field; FIELD_COUNT] = [
    Field::Row,
    Field::Col,
    Field::Bank,
    Field::Rank,
    Field::Channel,
];

/// Bit-field layout of a physical address: per-field widths, counts, and the
/// MSB-to-LSB order the fields are concatenated in. Order values run 1..=5
/// with 5 closest to the MSB.
#[derive(Debug, Clone)]
pub struct TranslationMethod {
    bit_widths: [u32; FIELD_COUNT],
    counts: [usize; FIELD_COUNT],
    order: [usize; FIELD_COUNT],
}

fn bits_for(count: usize) -> u32 {
    if count <= 1 {
        0
    } else {
        count.next_power_of_two().trailing_zeros()
    }
}

impl TranslationMethod {
    pub fn new(
        row_bits: u32,
        col_bits: u32,
        bank_bits: u32,
        rank_bits: u32,
        channel_bits: u32,
    ) -> Self {
        if col_bits < 8 {
            warn!("column bits ({col_bits}) below the minimum burst length of 8");
        }
        Self {
            bit_widths: [row_bits, col_bits, bank_bits, rank_bits, channel_bits],
            counts: [
                1 << row_bits,
                1 << col_bits,
                1 << bank_bits,
                1 << rank_bits,
                1 << channel_bits,
            ],
            // Default layout: channel - rank - row - bank - col, MSB to LSB.
            order: [3, 1, 2, 4, 5],
        }
    }

    /// Derive widths from topology counts.
    pub fn for_counts(rows: usize, cols: usize, banks: usize, ranks: usize, channels: usize) -> Self {
        let mut method = Self::new(
            bits_for(rows),
            bits_for(cols),
            bits_for(banks),
            bits_for(ranks),
            bits_for(channels),
        );
        method.counts = [rows, cols, banks, ranks, channels];
        method
    }

    /// Assign the MSB..LSB slot (5..1) of each field. Orders must form a
    /// permutation of 1..=5.
    pub fn set_order(
        &mut self,
        row: usize,
        col: usize,
        bank: usize,
        rank: usize,
        channel: usize,
    ) -> Result<(), ConfigError> {
        let orders = [row, col, bank, rank, channel];
        let mut seen = [false; FIELD_COUNT];
        for &slot in &orders {
            if slot == 0 || slot > FIELD_COUNT || seen[slot - 1] {
                return Err(ConfigError::BadFieldOrder { orders });
            }
            seen[slot - 1] = true;
        }
        self.order = orders;
        Ok(())
    }

    /// Parse a colon-separated list of field tags ordered MSB to LSB, e.g.
    /// "R:RK:BK:CH:C", and assign orders 5..1 in read order.
    pub fn set_address_mapping_scheme(&mut self, scheme: &str) -> Result<(), ConfigError> {
        let mut orders = [0usize; FIELD_COUNT];
        let mut current = FIELD_COUNT;
        for tag in scheme.split(':') {
            let field = match tag {
                "R" => Field::Row,
                "C" => Field::Col,
                "BK" => Field::Bank,
                "RK" => Field::Rank,
                "CH" => Field::Channel,
                _ => {
                    return Err(ConfigError::UnknownMappingTag {
                        tag: tag.to_string(),
                        scheme: scheme.to_string(),
                    })
                }
            };
            if current == 0 || orders[field as usize] != 0 {
                return Err(ConfigError::MalformedMappingScheme {
                    scheme: scheme.to_string(),
                });
            }
            orders[field as usize] = current;
            current -= 1;
        }
        if current != 0 {
            return Err(ConfigError::MalformedMappingScheme {
                scheme: scheme.to_string(),
            });
        }
        self.set_order(orders[0], orders[1], orders[2], orders[3], orders[4])
    }

    pub fn bit_widths(&self) -> (u32, u32, u32, u32, u32) {
        (
            self.bit_widths[0],
            self.bit_widths[1],
            self.bit_widths[2],
            self.bit_widths[3],
            self.bit_widths[4],
        )
    }

    pub fn order(&self) -> (usize, usize, usize, usize, usize) {
        (
            self.order[0],
            self.order[1],
            self.order[2],
            self.order[3],
            self.order[4],
        )
    }

    /// Total addressable bits on the channel.
    pub fn address_bits(&self) -> u32 {
        self.bit_widths.iter().sum()
    }

    fn field_with_order(&self, slot: usize) -> Field {
        for field in FIELDS {
            if self.order[field as usize] == slot {
                return field;
            }
        }
        unreachable!("order is a permutation of 1..=5");
    }
}

/// Bidirectional mapping between flat physical addresses and decoded tuples.
/// When `mat_height` is below the row count, the row field is split into
/// (row-in-subarray, subarray-index).
#[derive(Debug, Clone)]
pub struct AddressTranslator {
    method: TranslationMethod,
    mat_height: usize,
}

impl AddressTranslator {
    pub fn new(method: TranslationMethod, mat_height: usize) -> Result<Self, ConfigError> {
        let rows = method.counts[Field::Row as usize];
        if mat_height == 0 || rows % mat_height != 0 {
            return Err(ConfigError::BadMatHeight { rows, mat_height });
        }
        Ok(Self { method, mat_height })
    }

    pub fn method(&self) -> &TranslationMethod {
        &self.method
    }

    pub fn subarray_count(&self) -> usize {
        self.method.counts[Field::Row as usize] / self.mat_height
    }

    pub fn address_bits(&self) -> u32 {
        self.method.address_bits()
    }

    /// Decode a flat physical address. Total on the addressable range.
    pub fn translate(&self, phys: u64) -> MemAddr {
        let mut fields = [0usize; FIELD_COUNT];
        let mut shift = 0u32;
        for slot in 1..=FIELD_COUNT {
            let field = self.method.field_with_order(slot);
            let width = self.method.bit_widths[field as usize];
            let mask = (1u64 << width) - 1;
            fields[field as usize] = ((phys >> shift) & mask) as usize;
            shift += width;
        }
        let row_field = fields[Field::Row as usize];
        MemAddr {
            phys,
            row: row_field % self.mat_height,
            subarray: row_field / self.mat_height,
            col: fields[Field::Col as usize],
            bank: fields[Field::Bank as usize],
            rank: fields[Field::Rank as usize],
            channel: fields[Field::Channel as usize],
        }
    }

    /// Re-encode a tuple into a flat physical address. The sub-array index is
    /// composed back into the row bit-field.
    pub fn reverse_translate(
        &self,
        row: usize,
        col: usize,
        bank: usize,
        rank: usize,
        channel: usize,
        subarray: usize,
    ) -> u64 {
        debug_assert!(row < self.mat_height, "row exceeds the sub-array height");
        let row_field = subarray * self.mat_height + row;
        let mut fields = [0usize; FIELD_COUNT];
        fields[Field::Row as usize] = row_field;
        fields[Field::Col as usize] = col;
        fields[Field::Bank as usize] = bank;
        fields[Field::Rank as usize] = rank;
        fields[Field::Channel as usize] = channel;

        let mut phys = 0u64;
        let mut shift = 0u32;
        for slot in 1..=FIELD_COUNT {
            let field = self.method.field_with_order(slot);
            let width = self.method.bit_widths[field as usize];
            debug_assert!(
                (fields[field as usize] as u64) < (1u64 << width) || width == 0,
                "field value exceeds its bit width"
            );
            phys |= (fields[field as usize] as u64) << shift;
            shift += width;
        }
        phys
    }

    /// Re-encode a tuple and hand back the full decoded form.
    pub fn compose(
        &self,
        row: usize,
        col: usize,
        bank: usize,
        rank: usize,
        channel: usize,
        subarray: usize,
    ) -> MemAddr {
        MemAddr {
            phys: self.reverse_translate(row, col, bank, rank, channel, subarray),
            row,
            col,
            bank,
            rank,
            channel,
            subarray,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{AddressTranslator, TranslationMethod};
    use crate::mem::config::ConfigError;

    fn translator_256mb() -> AddressTranslator {
        // 16 row, 8 col, 3 bank, 1 rank, 1 channel bits; default order.
        let method = TranslationMethod::new(16, 8, 3, 1, 1);
        AddressTranslator::new(method, 1 << 16).unwrap()
    }

    #[test]
    fn round_trip_default_order() {
        let at = translator_256mb();
        for phys in [0u64, 1, 0xFF, 0x1234_5678, (1 << 29) - 1] {
            let t = at.translate(phys);
            assert_eq!(
                at.reverse_translate(t.row, t.col, t.bank, t.rank, t.channel, t.subarray),
                phys
            );
        }
    }

    #[test]
    fn scheme_parser_assigns_msb_first() {
        let mut method = TranslationMethod::new(16, 8, 3, 1, 1);
        method.set_address_mapping_scheme("R:RK:BK:CH:C").unwrap();
        assert_eq!(method.order(), (5, 1, 3, 4, 2));
    }

    #[test]
    fn scheme_parser_rejects_unknown_tag() {
        let mut method = TranslationMethod::new(16, 8, 3, 1, 1);
        assert!(matches!(
            method.set_address_mapping_scheme("R:RK:XX:CH:C"),
            Err(ConfigError::UnknownMappingTag { .. })
        ));
    }

    #[test]
    fn scheme_parser_rejects_short_scheme() {
        let mut method = TranslationMethod::new(16, 8, 3, 1, 1);
        assert!(matches!(
            method.set_address_mapping_scheme("R:RK:BK"),
            Err(ConfigError::MalformedMappingScheme { .. })
        ));
    }

    #[test]
    fn scheme_parser_rejects_duplicate_tag() {
        let mut method = TranslationMethod::new(16, 8, 3, 1, 1);
        assert!(matches!(
            method.set_address_mapping_scheme("R:R:BK:CH:C"),
            Err(ConfigError::MalformedMappingScheme { .. })
        ));
    }

    #[test]
    fn set_order_rejects_duplicates() {
        let mut method = TranslationMethod::new(16, 8, 3, 1, 1);
        assert!(matches!(
            method.set_order(1, 1, 3, 4, 5),
            Err(ConfigError::BadFieldOrder { .. })
        ));
        assert!(matches!(
            method.set_order(0, 2, 3, 4, 5),
            Err(ConfigError::BadFieldOrder { .. })
        ));
    }

    #[test]
    fn subarray_split_round_trips() {
        // 64 rows split into sub-arrays of 16: subarray = row_field / 16.
        let method = TranslationMethod::for_counts(64, 256, 8, 2, 1);
        let at = AddressTranslator::new(method, 16).unwrap();
        assert_eq!(at.subarray_count(), 4);
        let phys = at.reverse_translate(5, 17, 3, 1, 0, 2);
        let t = at.translate(phys);
        assert_eq!((t.row, t.subarray), (5, 2));
        assert_eq!((t.col, t.bank, t.rank, t.channel), (17, 3, 1, 0));
        assert_eq!(t.phys, phys);
    }

    #[test]
    fn mat_height_must_divide_rows() {
        let method = TranslationMethod::for_counts(64, 256, 8, 2, 1);
        assert!(matches!(
            AddressTranslator::new(method, 48),
            Err(ConfigError::BadMatHeight { .. })
        ));
    }
}
