//! Voice profiles, presets and the profile store

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use vx_core::{VoxError, VoxResult};

// ═══════════════════════════════════════════════════════════════════════════════
// PROFILE
// ═══════════════════════════════════════════════════════════════════════════════

/// Target voice description
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub name: String,
    /// Target mean F0 (Hz)
    pub base_f0: f64,
    /// Target F0 standard deviation (Hz)
    pub f0_std: f64,
    /// Formant frequency ratio (>1 raises formants)
    pub formant_shift: f64,
    /// dB per octave around 500 Hz; positive darkens
    pub spectral_tilt: f64,
    /// Extra aperiodicity, 0..1
    pub breathiness: f64,
    /// Frame-to-frame amplitude perturbation, 0..1
    #[serde(default)]
    pub shimmer: f64,
}

impl VoiceProfile {
    pub fn new(name: impl Into<String>, base_f0: f64, f0_std: f64) -> Self {
        Self {
            name: name.into(),
            base_f0,
            f0_std,
            formant_shift: 1.0,
            spectral_tilt: 0.0,
            breathiness: 0.0,
            shimmer: 0.0,
        }
    }

    pub fn formant_shift(mut self, ratio: f64) -> Self {
        self.formant_shift = ratio;
        self
    }

    pub fn spectral_tilt(mut self, db_per_octave: f64) -> Self {
        self.spectral_tilt = db_per_octave;
        self
    }

    pub fn breathiness(mut self, amount: f64) -> Self {
        self.breathiness = amount;
        self
    }

    pub fn shimmer(mut self, amount: f64) -> Self {
        self.shimmer = amount;
        self
    }

    pub fn validate(&self) -> VoxResult<()> {
        let bad = |what: &str, value: f64| {
            Err(VoxError::input(format!(
                "profile '{}': invalid {what} {value}",
                self.name
            )))
        };
        if !(self.base_f0 > 0.0 && self.base_f0.is_finite()) {
            return bad("base_f0", self.base_f0);
        }
        if !(self.f0_std >= 0.0 && self.f0_std.is_finite()) {
            return bad("f0_std", self.f0_std);
        }
        if !(self.formant_shift > 0.0 && self.formant_shift.is_finite()) {
            return bad("formant_shift", self.formant_shift);
        }
        if !self.spectral_tilt.is_finite() {
            return bad("spectral_tilt", self.spectral_tilt);
        }
        if !(0.0..=1.0).contains(&self.breathiness) {
            return bad("breathiness", self.breathiness);
        }
        if !(0.0..1.0).contains(&self.shimmer) {
            return bad("shimmer", self.shimmer);
        }
        Ok(())
    }
}

/// Shortcut to a profile with optional overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionPreset {
    pub name: String,
    /// Base profile name
    pub profile: String,
    /// Added on top of the profile's target mean
    #[serde(default)]
    pub pitch_shift_semitones: f64,
    /// Replaces the profile's formant ratio
    #[serde(default)]
    pub formant_override: Option<f64>,
    #[serde(default)]
    pub description: String,
}

/// Which target voice a request asks for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum VoiceSelector {
    Profile(String),
    Preset(String),
}

impl Default for VoiceSelector {
    fn default() -> Self {
        Self::Profile("female_voice_1".into())
    }
}

impl fmt::Display for VoiceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Profile(name) => write!(f, "profile:{name}"),
            Self::Preset(name) => write!(f, "preset:{name}"),
        }
    }
}

impl FromStr for VoiceSelector {
    type Err = VoxError;

    /// `preset:<name>`, `profile:<name>` or a bare profile name
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(VoxError::input("empty voice selector"));
        }
        Ok(match s.split_once(':') {
            Some(("preset", name)) => Self::Preset(name.to_string()),
            Some(("profile", name)) => Self::Profile(name.to_string()),
            _ => Self::Profile(s.to_string()),
        })
    }
}

/// Profile plus any preset adjustments, ready for the transformer
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedVoice {
    pub profile: VoiceProfile,
    pub extra_pitch_shift_semitones: f64,
    /// Human-readable origin, e.g. `preset:male_to_female`
    pub label: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// STORE
// ═══════════════════════════════════════════════════════════════════════════════

/// Immutable lookup of profiles and presets. Lookups return copies.
#[derive(Debug, Clone)]
pub struct VoiceProfileStore {
    profiles: BTreeMap<String, VoiceProfile>,
    presets: BTreeMap<String, ConversionPreset>,
}

impl Default for VoiceProfileStore {
    fn default() -> Self {
        Self::builtin()
    }
}

impl VoiceProfileStore {
    /// Store with the built-in profiles and presets
    pub fn builtin() -> Self {
        let mut profiles = BTreeMap::new();
        for profile in builtin_profiles() {
            profiles.insert(profile.name.clone(), profile);
        }
        let mut presets = BTreeMap::new();
        for preset in builtin_presets() {
            presets.insert(preset.name.clone(), preset);
        }
        Self { profiles, presets }
    }

    /// Start from the built-ins and add custom entries
    pub fn builder() -> VoiceProfileStoreBuilder {
        VoiceProfileStoreBuilder::new()
    }

    pub fn get(&self, name: &str) -> VoxResult<VoiceProfile> {
        self.profiles
            .get(name)
            .cloned()
            .ok_or_else(|| VoxError::input(format!("unknown voice profile '{name}'")))
    }

    pub fn preset(&self, name: &str) -> VoxResult<ConversionPreset> {
        self.presets
            .get(name)
            .cloned()
            .ok_or_else(|| VoxError::input(format!("unknown preset '{name}'")))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.profiles.contains_key(name)
    }

    pub fn profiles(&self) -> impl Iterator<Item = &VoiceProfile> {
        self.profiles.values()
    }

    pub fn presets(&self) -> impl Iterator<Item = &ConversionPreset> {
        self.presets.values()
    }

    /// Resolve a selector to a concrete profile
    pub fn resolve(&self, selector: &VoiceSelector) -> VoxResult<ResolvedVoice> {
        match selector {
            VoiceSelector::Profile(name) => Ok(ResolvedVoice {
                profile: self.get(name)?,
                extra_pitch_shift_semitones: 0.0,
                label: selector.to_string(),
            }),
            VoiceSelector::Preset(name) => {
                let preset = self.preset(name)?;
                let mut profile = self.get(&preset.profile)?;
                if let Some(ratio) = preset.formant_override {
                    profile.formant_shift = ratio;
                }
                Ok(ResolvedVoice {
                    profile,
                    extra_pitch_shift_semitones: preset.pitch_shift_semitones,
                    label: selector.to_string(),
                })
            }
        }
    }
}

/// Builder for [`VoiceProfileStore`]
#[derive(Debug, Clone)]
pub struct VoiceProfileStoreBuilder {
    store: VoiceProfileStore,
}

impl Default for VoiceProfileStoreBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl VoiceProfileStoreBuilder {
    pub fn new() -> Self {
        Self {
            store: VoiceProfileStore::builtin(),
        }
    }

    /// Add or replace a profile
    pub fn profile(mut self, profile: VoiceProfile) -> Self {
        self.store.profiles.insert(profile.name.clone(), profile);
        self
    }

    /// Add or replace a preset
    pub fn preset(mut self, preset: ConversionPreset) -> Self {
        self.store.presets.insert(preset.name.clone(), preset);
        self
    }

    /// Add profiles from a JSON array of [`VoiceProfile`]
    pub fn profiles_from_json(mut self, path: &Path) -> VoxResult<Self> {
        let text = std::fs::read_to_string(path)?;
        let profiles: Vec<VoiceProfile> = serde_json::from_str(&text).map_err(|e| {
            VoxError::input(format!("invalid profile file {}: {e}", path.display()))
        })?;
        for profile in profiles {
            self.store.profiles.insert(profile.name.clone(), profile);
        }
        Ok(self)
    }

    /// Validate every entry and freeze the store
    pub fn build(self) -> VoxResult<VoiceProfileStore> {
        for profile in self.store.profiles.values() {
            profile.validate()?;
        }
        for preset in self.store.presets.values() {
            if !self.store.profiles.contains_key(&preset.profile) {
                return Err(VoxError::input(format!(
                    "preset '{}' refers to unknown profile '{}'",
                    preset.name, preset.profile
                )));
            }
            if let Some(ratio) = preset.formant_override {
                if !(ratio > 0.0 && ratio.is_finite()) {
                    return Err(VoxError::input(format!(
                        "preset '{}': invalid formant override {ratio}",
                        preset.name
                    )));
                }
            }
        }
        Ok(self.store)
    }
}

fn builtin_profiles() -> Vec<VoiceProfile> {
    vec![
        VoiceProfile::new("female_voice_1", 220.0, 50.0)
            .formant_shift(1.35)
            .spectral_tilt(-6.0)
            .breathiness(0.3)
            .shimmer(0.05),
        VoiceProfile::new("male_voice_1", 120.0, 30.0)
            .formant_shift(0.75)
            .spectral_tilt(6.0)
            .breathiness(0.1)
            .shimmer(0.03),
        VoiceProfile::new("anime_female", 280.0, 60.0)
            .formant_shift(1.5)
            .spectral_tilt(-8.0)
            .breathiness(0.4)
            .shimmer(0.08),
        VoiceProfile::new("deep_male", 95.0, 25.0)
            .formant_shift(0.65)
            .spectral_tilt(8.0)
            .breathiness(0.05)
            .shimmer(0.02),
        VoiceProfile::new("soft_female", 200.0, 40.0)
            .formant_shift(1.3)
            .spectral_tilt(-4.0)
            .breathiness(0.5)
            .shimmer(0.06),
    ]
}

fn builtin_presets() -> Vec<ConversionPreset> {
    let preset = |name: &str, profile: &str, semitones: f64, formant: f64, description: &str| {
        ConversionPreset {
            name: name.into(),
            profile: profile.into(),
            pitch_shift_semitones: semitones,
            formant_override: Some(formant),
            description: description.into(),
        }
    };
    vec![
        preset("male_to_female", "female_voice_1", 0.0, 1.4, "Convert male voice to female"),
        preset("female_to_male", "male_voice_1", 0.0, 0.7, "Convert female voice to male"),
        preset("male_to_child", "anime_female", 0.0, 1.5, "Convert male voice to child"),
        preset("female_to_child", "anime_female", 0.0, 1.4, "Convert female voice to child"),
        preset("dramatic_change", "anime_female", 4.0, 1.6, "Extreme voice transformation"),
    ]
}
