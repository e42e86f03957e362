//! Transformation presets.
//!
//! A [`Preset`] names a target size, fit mode and JPEG quality for one UI
//! role (avatar, banner, feed thumbnail, ...). Presets are collected in a
//! [`PresetRegistry`] that is built once at startup and never mutated.

use std::collections::HashMap;
use std::fmt;

use crate::ValidationError;

/// How a source image is fitted to a preset's dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FitMode {
    /// Scale to cover the whole target area, then center-crop to exact size.
    Cover,
    /// Scale down to the target width preserving aspect ratio. Never upscales.
    Contain,
}

impl FitMode {
    /// Lowercase name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cover => "cover",
            Self::Contain => "contain",
        }
    }
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named image transformation profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preset {
    /// Registry key; ASCII without path separators.
    pub name: String,
    /// Target width in pixels (at least 1).
    pub width: u32,
    /// Target height in pixels. `0` is only allowed for [`FitMode::Contain`]
    /// and means "scale to width".
    pub height: u32,
    /// Fit mode.
    pub fit: FitMode,
    /// JPEG output quality (1-100).
    pub quality: u8,
}

impl Preset {
    /// Create a preset without validating it.
    #[must_use]
    pub fn new(name: impl Into<String>, width: u32, height: u32, fit: FitMode, quality: u8) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            fit,
            quality,
        }
    }

    /// Check the numeric bounds and the name.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.name.is_empty()
            || self.name.contains("..")
            || self.name.contains(['/', '\\', '\0'])
            || !self.name.is_ascii()
        {
            return Err(ValidationError::InvalidPreset);
        }
        if self.width == 0 {
            return Err(ValidationError::InvalidPreset);
        }
        if self.fit == FitMode::Cover && self.height == 0 {
            return Err(ValidationError::InvalidPreset);
        }
        if !(1..=100).contains(&self.quality) {
            return Err(ValidationError::InvalidPreset);
        }
        Ok(())
    }
}

/// Read-only preset table keyed by name.
#[derive(Debug, Clone)]
pub struct PresetRegistry {
    presets: HashMap<String, Preset>,
}

impl PresetRegistry {
    /// Build a registry from a list of presets.
    ///
    /// Every preset is validated; a later preset with a duplicate name
    /// replaces the earlier one.
    pub fn new(presets: impl IntoIterator<Item = Preset>) -> Result<Self, ValidationError> {
        let mut map = HashMap::new();
        for preset in presets {
            preset.validate()?;
            map.insert(preset.name.clone(), preset);
        }
        Ok(Self { presets: map })
    }

    /// The built-in presets served by the proxy.
    #[must_use]
    pub fn builtin() -> Self {
        let presets = [
            Preset::new("avatar", 1000, 1000, FitMode::Cover, 85),
            Preset::new("avatar_small", 360, 360, FitMode::Cover, 80),
            Preset::new("banner", 640, 300, FitMode::Cover, 85),
            Preset::new("content_preview", 800, 0, FitMode::Contain, 80),
            Preset::new("content_full", 1600, 0, FitMode::Contain, 90),
            Preset::new("embed_thumbnail", 720, 360, FitMode::Cover, 80),
        ];
        Self {
            presets: presets.into_iter().map(|p| (p.name.clone(), p)).collect(),
        }
    }

    /// Look up a preset by exact, case-sensitive name.
    pub fn get(&self, name: &str) -> Result<&Preset, ValidationError> {
        if name.is_empty() {
            return Err(ValidationError::InvalidPreset);
        }
        self.presets.get(name).ok_or(ValidationError::InvalidPreset)
    }

    /// All presets, in no particular order.
    pub fn list(&self) -> Vec<&Preset> {
        self.presets.values().collect()
    }

    /// Number of presets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.presets.len()
    }

    /// Whether the registry has no presets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}

impl Default for PresetRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_builtin_presets() {
        let registry = PresetRegistry::builtin();

        let cases = [
            ("avatar", 1000, 1000, FitMode::Cover, 85),
            ("avatar_small", 360, 360, FitMode::Cover, 80),
            ("banner", 640, 300, FitMode::Cover, 85),
            ("content_preview", 800, 0, FitMode::Contain, 80),
            ("content_full", 1600, 0, FitMode::Contain, 90),
            ("embed_thumbnail", 720, 360, FitMode::Cover, 80),
        ];

        assert_eq!(registry.len(), cases.len());
        for (name, width, height, fit, quality) in cases {
            let preset = registry.get(name).unwrap();
            assert_eq!(*preset, Preset::new(name, width, height, fit, quality));
        }
    }

    #[test]
    fn test_all_builtin_presets_validate() {
        for preset in PresetRegistry::builtin().list() {
            assert!(preset.validate().is_ok(), "preset {} invalid", preset.name);
        }
    }

    #[test]
    fn test_get_unknown_preset() {
        let registry = PresetRegistry::builtin();
        assert_eq!(
            registry.get("invalid_preset"),
            Err(ValidationError::InvalidPreset)
        );
        assert_eq!(registry.get(""), Err(ValidationError::InvalidPreset));
    }

    #[test]
    fn test_get_is_case_sensitive() {
        let registry = PresetRegistry::builtin();
        assert!(registry.get("Avatar").is_err());
        assert!(registry.get("AVATAR").is_err());
    }

    #[test]
    fn test_fit_mode_display() {
        assert_eq!(FitMode::Cover.to_string(), "cover");
        assert_eq!(FitMode::Contain.to_string(), "contain");
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let valid = Preset::new("thumb", 100, 100, FitMode::Cover, 80);
        assert!(valid.validate().is_ok());

        let invalid = [
            Preset { name: String::new(), ..valid.clone() },
            Preset { name: "a/b".to_owned(), ..valid.clone() },
            Preset { name: "..".to_owned(), ..valid.clone() },
            Preset { width: 0, ..valid.clone() },
            Preset { height: 0, ..valid.clone() },
            Preset { quality: 0, ..valid.clone() },
            Preset { quality: 101, ..valid.clone() },
        ];
        for preset in invalid {
            assert_eq!(
                preset.validate(),
                Err(ValidationError::InvalidPreset),
                "expected {preset:?} to be rejected"
            );
        }
    }

    #[test]
    fn test_validate_allows_zero_height_for_contain() {
        let preset = Preset::new("wide", 800, 0, FitMode::Contain, 80);
        assert!(preset.validate().is_ok());
    }

    #[test]
    fn test_new_registry_validates_presets() {
        let result = PresetRegistry::new([Preset::new("bad", 0, 10, FitMode::Cover, 80)]);
        assert!(matches!(result, Err(ValidationError::InvalidPreset)));

        let registry = PresetRegistry::new([Preset::new("ok", 10, 10, FitMode::Cover, 80)]).unwrap();
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("ok").unwrap().width, 10);
    }
}
