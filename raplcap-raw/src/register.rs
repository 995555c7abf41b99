//! Generic register abstractions for type-safe MSR programming

/// Trait for register layouts that can be converted to/from raw MSR values
///
/// RAPL registers carry reserved and unrelated bits next to the fields a
/// layout knows about, so writes go through [`RegisterLayout::apply_to`],
/// which only touches the layout's own fields and leaves every other bit of
/// the current register value in place.
///
/// # Example
///
/// ```ignore
/// use raplcap_raw::bits::{extract_bits, replace_bits};
/// use raplcap_raw::register::RegisterLayout;
///
/// #[derive(Debug, Default)]
/// struct MyControl {
///     enable: bool,
///     threshold: u8,
/// }
///
/// impl RegisterLayout for MyControl {
///     fn from_msr_value(value: u64) -> Self {
///         Self {
///             enable: extract_bits(value, 0, 0) == 1,
///             threshold: extract_bits(value, 8, 15) as u8,
///         }
///     }
///
///     fn apply_to(&self, value: u64) -> u64 {
///         let value = replace_bits(value, self.enable as u64, 0, 0);
///         replace_bits(value, self.threshold as u64, 8, 15)
///     }
/// }
/// ```
pub trait RegisterLayout: Sized {
    /// Parse a raw MSR value into this register layout
    fn from_msr_value(value: u64) -> Self;

    /// Write this layout's fields into `value`, preserving all other bits
    fn apply_to(&self, value: u64) -> u64;

    /// Convert this register layout to a raw MSR value with all other bits zero
    fn to_msr_value(&self) -> u64 {
        self.apply_to(0)
    }
}
