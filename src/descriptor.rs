//! Instrument configuration snapshot.
//!
//! A [`ConfigurationDescriptor`] holds every hardware parameter applied by one
//! configuration pass. It is built by the run-configuration layer (directly,
//! through [`DescriptorBuilder`], or deserialized with serde) and is never
//! mutated by the engine.
//!
//! Four parameters are gated behind extended mode; see
//! [`ConfigurationDescriptor::extended_features`].

use std::fmt;

use serde::{Deserialize, Serialize};

/// Number of front-end DAC channels.
pub const DAC_COUNT: usize = 16;

/// Multiplexer selection that disconnects every input.
pub const MUX_OFF: u8 = 255;

/// Trigger source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerMode {
    /// Software-forced test pattern
    Test,
    /// Forced (unbiased) triggers
    Forced,
    /// SPE discriminator
    Discriminator,
    /// Flasher board LED triggers
    Flasher,
}

impl TriggerMode {
    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Test => 0,
            Self::Forced => 1,
            Self::Discriminator => 2,
            Self::Flasher => 3,
        }
    }
}

/// Hit record format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataFormat {
    /// Uncompressed engineering records
    Engineering,
    /// Delta-compressed records
    Delta,
}

impl DataFormat {
    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Engineering => 0,
            Self::Delta => 2,
        }
    }
}

/// Hit compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompressionMode {
    /// No compression
    Off,
    /// Road-grader threshold compression
    RoadGrader,
}

impl CompressionMode {
    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::RoadGrader => 1,
        }
    }
}

/// Monitoring record periods, in instrument clock ticks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoniIntervals {
    /// Hardware state record period
    pub hardware: u32,
    /// Configuration state record period
    pub config: u32,
}

impl Default for MoniIntervals {
    fn default() -> Self {
        // 40 MHz clock: one hardware record per second, config every 10 s
        Self {
            hardware: 40_000_000,
            config: 400_000_000,
        }
    }
}

/// Sample counts kept in engineering-format hits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineeringFormat {
    /// FADC samples
    pub fadc_samples: u8,
    /// ATWD samples per channel (0, 16, 32, 64 or 128)
    pub atwd_samples: [u8; 4],
}

impl Default for EngineeringFormat {
    fn default() -> Self {
        Self {
            fadc_samples: 255,
            atwd_samples: [128, 128, 128, 0],
        }
    }
}

/// Pulser state when not in flasher mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PulserMode {
    /// Front-end pulser disabled, beacon hits only
    Beacon,
    /// Front-end pulser enabled
    Pulser,
}

/// Pulser settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PulserConfig {
    /// Pulser or beacon
    pub mode: PulserMode,
    /// Rate in Hz
    pub rate: u16,
}

impl Default for PulserConfig {
    fn default() -> Self {
        Self {
            mode: PulserMode::Beacon,
            rate: 5,
        }
    }
}

/// Local coincidence requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LcMode {
    /// No coincidence requirement
    Off,
    /// Neighbour above or below
    UpOrDown,
    /// Neighbour above
    Up,
    /// Neighbour below
    Down,
    /// Both neighbours
    UpAndDown,
    /// Header-only readout for isolated hits
    Headers,
}

impl LcMode {
    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::UpOrDown => 1,
            Self::Up => 2,
            Self::Down => 3,
            Self::UpAndDown => 4,
            Self::Headers => 5,
        }
    }
}

/// Local coincidence signalling type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LcType {
    /// Soft local coincidence
    Soft,
    /// Hard local coincidence
    Hard,
    /// Soft LC with full readout on coincidence
    Flabby,
}

impl LcType {
    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::Soft => 1,
            Self::Hard => 2,
            Self::Flabby => 3,
        }
    }
}

/// Local coincidence block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalCoincidence {
    /// Coincidence requirement
    pub mode: LcMode,
    /// Signalling type
    pub lc_type: LcType,
    /// Pre-trigger window in ns
    pub pre_window: u32,
    /// Post-trigger window in ns
    pub post_window: u32,
    /// Transmit mode code
    pub tx: u8,
    /// Source code (SPE or MPE discriminator)
    pub source: u8,
    /// Neighbour span
    pub span: u8,
    /// Cable length corrections in ns: four up, then four down
    pub cable_lengths: [u16; 8],
}

impl Default for LocalCoincidence {
    fn default() -> Self {
        Self {
            mode: LcMode::Off,
            lc_type: LcType::Hard,
            pre_window: 1000,
            post_window: 1000,
            tx: 0,
            source: 0,
            span: 1,
            cable_lengths: [0; 8],
        }
    }
}

/// Supernova scaler settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupernovaConfig {
    /// Artificial deadtime in ns
    pub deadtime: u32,
    /// Count on SPE rather than MPE discriminator
    pub spe: bool,
}

/// Chargestamp source selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargeStampSource {
    /// Use ATWD rather than FADC
    pub atwd: bool,
    /// Pick the ATWD channel automatically
    pub auto_channel: bool,
    /// ATWD channel when not automatic
    pub channel: u8,
}

/// Chargestamp histogramming parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistogramConfig {
    /// Histogram readout interval in seconds
    pub interval: u32,
    /// Prescale factor
    pub prescale: u16,
}

/// DAQ readout mode (extended mode only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaqMode {
    /// ATWD and FADC waveforms
    AtwdFadc,
    /// FADC waveforms only
    Fadc,
    /// Timestamps only
    TimestampOnly,
}

impl DaqMode {
    /// Wire code.
    pub fn code(self) -> u8 {
        match self {
            Self::AtwdFadc => 0,
            Self::Fadc => 1,
            Self::TimestampOnly => 2,
        }
    }
}

/// Self local coincidence (extended mode only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfLcConfig {
    /// Mode code
    pub mode: u8,
    /// Window in ns
    pub window: u32,
}

/// Flasher board run parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlasherConfig {
    /// LED brightness (0-127)
    pub brightness: u8,
    /// Pulse width (0-127)
    pub width: u8,
    /// Launch delay in ns
    pub delay: u16,
    /// Bitmask of LEDs to fire
    pub mask: u16,
    /// Flash rate in Hz
    pub rate: u16,
}

/// Parameters that require extended mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ExtendedFeature {
    /// Alternate trigger mode
    AltTriggerMode,
    /// DAQ readout mode
    DaqMode,
    /// Self local coincidence
    SelfLc,
    /// Onboard LED
    OnboardLed,
}

impl fmt::Display for ExtendedFeature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AltTriggerMode => "alternate trigger mode",
            Self::DaqMode => "DAQ mode",
            Self::SelfLc => "self local coincidence",
            Self::OnboardLed => "onboard LED",
        };
        f.write_str(name)
    }
}

/// Full hardware configuration for one instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigurationDescriptor {
    /// Monitoring record periods
    pub moni_intervals: MoniIntervals,
    /// Fast monitoring period (newer firmware)
    pub fast_moni_interval: Option<u32>,
    /// Hit record format
    pub data_format: DataFormat,
    /// Hit compression
    pub compression: CompressionMode,
    /// Engineering-format sample counts
    pub engineering_format: EngineeringFormat,
    /// PMT high voltage in DAC units; `None` switches HV off
    pub hv: Option<u16>,
    /// Front-end DAC settings
    pub dacs: [u16; DAC_COUNT],
    /// Multiplexer channel; `None` disconnects it
    pub mux: Option<u8>,
    /// Trigger source
    pub trigger_mode: TriggerMode,
    /// Pulser settings
    pub pulser: PulserConfig,
    /// Local coincidence block
    pub local_coincidence: LocalCoincidence,
    /// Supernova scalers; `None` disables them
    pub supernova: Option<SupernovaConfig>,
    /// Scaler deadtime in ns
    pub scaler_deadtime: u32,
    /// Pedestal subtraction (newer firmware)
    pub pedestal_subtraction: Option<bool>,
    /// Chargestamp source (newer firmware)
    pub chargestamp_source: Option<ChargeStampSource>,
    /// Chargestamp histogramming (newer firmware)
    pub histogram: Option<HistogramConfig>,
    /// Lookback memory depth as a power of two (newer firmware)
    pub lbm_depth: Option<u8>,
    /// Alternate trigger mode (extended)
    pub alt_trigger_mode: Option<TriggerMode>,
    /// DAQ readout mode (extended)
    pub daq_mode: Option<DaqMode>,
    /// Self local coincidence (extended)
    pub self_lc: Option<SelfLcConfig>,
    /// Onboard LED brightness (extended)
    pub onboard_led: Option<u8>,
}

impl Default for ConfigurationDescriptor {
    fn default() -> Self {
        Self {
            moni_intervals: MoniIntervals::default(),
            fast_moni_interval: None,
            data_format: DataFormat::Delta,
            compression: CompressionMode::Off,
            engineering_format: EngineeringFormat::default(),
            hv: None,
            dacs: DEFAULT_DACS,
            mux: None,
            trigger_mode: TriggerMode::Discriminator,
            pulser: PulserConfig::default(),
            local_coincidence: LocalCoincidence::default(),
            supernova: None,
            scaler_deadtime: 51_200,
            pedestal_subtraction: None,
            chargestamp_source: None,
            histogram: None,
            lbm_depth: None,
            alt_trigger_mode: None,
            daq_mode: None,
            self_lc: None,
            onboard_led: None,
        }
    }
}

const DEFAULT_DACS: [u16; DAC_COUNT] = [
    850, 2097, 600, 2048, 850, 2097, 600, 1925, 700, 700, 0, 0, 0, 0, 0, 0,
];

impl ConfigurationDescriptor {
    /// Start building a descriptor from defaults.
    pub fn builder() -> DescriptorBuilder {
        DescriptorBuilder::default()
    }

    /// Whether supernova readout is configured on.
    pub fn supernova_enabled(&self) -> bool {
        self.supernova.is_some()
    }

    /// Extended-mode parameters present in this descriptor, in application
    /// order.
    pub fn extended_features(&self) -> Vec<ExtendedFeature> {
        let mut features = Vec::new();
        if self.alt_trigger_mode.is_some() {
            features.push(ExtendedFeature::AltTriggerMode);
        }
        if self.daq_mode.is_some() {
            features.push(ExtendedFeature::DaqMode);
        }
        if self.self_lc.is_some() {
            features.push(ExtendedFeature::SelfLc);
        }
        if self.onboard_led.is_some() {
            features.push(ExtendedFeature::OnboardLed);
        }
        features
    }
}

/// Builder for [`ConfigurationDescriptor`].
///
/// # Example
/// ```
/// use omdaq::descriptor::{ConfigurationDescriptor, SupernovaConfig, TriggerMode};
///
/// let descriptor = ConfigurationDescriptor::builder()
///     .hv(1400)
///     .trigger_mode(TriggerMode::Discriminator)
///     .supernova(SupernovaConfig { deadtime: 250_000, spe: true })
///     .build();
/// assert!(descriptor.supernova_enabled());
/// ```
#[derive(Debug, Clone, Default)]
pub struct DescriptorBuilder {
    descriptor: ConfigurationDescriptor,
}

impl DescriptorBuilder {
    /// Monitoring periods.
    pub fn moni_intervals(mut self, intervals: MoniIntervals) -> Self {
        self.descriptor.moni_intervals = intervals;
        self
    }

    /// Fast monitoring period.
    pub fn fast_moni_interval(mut self, interval: u32) -> Self {
        self.descriptor.fast_moni_interval = Some(interval);
        self
    }

    /// Hit format and compression.
    pub fn data_format(mut self, format: DataFormat, compression: CompressionMode) -> Self {
        self.descriptor.data_format = format;
        self.descriptor.compression = compression;
        self
    }

    /// Engineering-format sample counts.
    pub fn engineering_format(mut self, format: EngineeringFormat) -> Self {
        self.descriptor.engineering_format = format;
        self
    }

    /// Switch HV on at this setting.
    pub fn hv(mut self, hv: u16) -> Self {
        self.descriptor.hv = Some(hv);
        self
    }

    /// Set one DAC channel. Indices outside the DAC range are ignored.
    pub fn dac(mut self, index: usize, value: u16) -> Self {
        if let Some(slot) = self.descriptor.dacs.get_mut(index) {
            *slot = value;
        }
        self
    }

    /// Multiplexer channel.
    pub fn mux(mut self, channel: u8) -> Self {
        self.descriptor.mux = Some(channel);
        self
    }

    /// Trigger source.
    pub fn trigger_mode(mut self, mode: TriggerMode) -> Self {
        self.descriptor.trigger_mode = mode;
        self
    }

    /// Pulser settings.
    pub fn pulser(mut self, pulser: PulserConfig) -> Self {
        self.descriptor.pulser = pulser;
        self
    }

    /// Local coincidence block.
    pub fn local_coincidence(mut self, lc: LocalCoincidence) -> Self {
        self.descriptor.local_coincidence = lc;
        self
    }

    /// Enable supernova scalers.
    pub fn supernova(mut self, supernova: SupernovaConfig) -> Self {
        self.descriptor.supernova = Some(supernova);
        self
    }

    /// Scaler deadtime.
    pub fn scaler_deadtime(mut self, deadtime: u32) -> Self {
        self.descriptor.scaler_deadtime = deadtime;
        self
    }

    /// Pedestal subtraction.
    pub fn pedestal_subtraction(mut self, enabled: bool) -> Self {
        self.descriptor.pedestal_subtraction = Some(enabled);
        self
    }

    /// Chargestamp source.
    pub fn chargestamp_source(mut self, source: ChargeStampSource) -> Self {
        self.descriptor.chargestamp_source = Some(source);
        self
    }

    /// Chargestamp histogramming.
    pub fn histogram(mut self, histogram: HistogramConfig) -> Self {
        self.descriptor.histogram = Some(histogram);
        self
    }

    /// Lookback memory depth.
    pub fn lbm_depth(mut self, depth: u8) -> Self {
        self.descriptor.lbm_depth = Some(depth);
        self
    }

    /// Alternate trigger mode.
    pub fn alt_trigger_mode(mut self, mode: TriggerMode) -> Self {
        self.descriptor.alt_trigger_mode = Some(mode);
        self
    }

    /// DAQ readout mode.
    pub fn daq_mode(mut self, mode: DaqMode) -> Self {
        self.descriptor.daq_mode = Some(mode);
        self
    }

    /// Self local coincidence.
    pub fn self_lc(mut self, self_lc: SelfLcConfig) -> Self {
        self.descriptor.self_lc = Some(self_lc);
        self
    }

    /// Onboard LED brightness.
    pub fn onboard_led(mut self, brightness: u8) -> Self {
        self.descriptor.onboard_led = Some(brightness);
        self
    }

    /// Finish building.
    pub fn build(self) -> ConfigurationDescriptor {
        self.descriptor
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extended_features_match_gated_fields() {
        let plain = ConfigurationDescriptor::default();
        assert!(plain.extended_features().is_empty());

        let gated = ConfigurationDescriptor::builder()
            .daq_mode(DaqMode::Fadc)
            .onboard_led(3)
            .build();
        assert_eq!(
            gated.extended_features(),
            vec![ExtendedFeature::DaqMode, ExtendedFeature::OnboardLed]
        );
    }

    #[test]
    fn test_builder_ignores_out_of_range_dac() {
        let descriptor = ConfigurationDescriptor::builder()
            .dac(0, 1)
            .dac(DAC_COUNT, 99)
            .build();
        assert_eq!(descriptor.dacs[0], 1);
        assert!(!descriptor.dacs.contains(&99));
    }

    #[test]
    fn test_deserializes_partial_toml() {
        let descriptor: ConfigurationDescriptor = toml::from_str(
            r#"
            hv = 1350
            trigger_mode = "flasher"

            [supernova]
            deadtime = 250000
            spe = true
            "#,
        )
        .unwrap();
        assert_eq!(descriptor.hv, Some(1350));
        assert_eq!(descriptor.trigger_mode, TriggerMode::Flasher);
        assert!(descriptor.supernova_enabled());
        assert_eq!(descriptor.dacs, DEFAULT_DACS);
    }
}
