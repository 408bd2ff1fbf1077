// condition.rs — named compile-time flags for library kernels.
//
// Library modules branch on flags with C-style directives:
//
//   #ifdef CIE_D50
//   const RGB2XYZ = mat3x3f(...);   // D50 primaries
//   #else
//   const RGB2XYZ = mat3x3f(...);   // D65 primaries
//   #endif
//
// A test enables a flag by putting it in a `ConditionSet`; the assembler then
// emits `#define CIE_D50` at the top of the program. Flags are a closed enum
// so a typo is an error rather than a silently ignored define.
//
// Flags in the same `ConditionGroup` select between alternatives of one
// setting (e.g. which illuminant). Enabling two of them at once is rejected
// instead of letting the library's `#ifdef` chain pick one by accident.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::AssemblyError;

/// A known library compile-time flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Condition {
    /// XYZ conversions use D50 white point primaries.
    CieD50,
    /// XYZ conversions use D65 primaries (the library default, made explicit).
    CieD65,
    /// YUV conversions use SDTV (BT.601) luma coefficients instead of HDTV (BT.709).
    YuvSdtv,
    /// YPbPr conversions use SDTV (BT.601) coefficients instead of HDTV (BT.709).
    YpbprSdtv,
}

/// A set of mutually exclusive flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConditionGroup {
    Illuminant,
}

impl ConditionGroup {
    pub fn name(self) -> &'static str {
        match self {
            ConditionGroup::Illuminant => "illuminant",
        }
    }
}

impl Condition {
    pub const ALL: [Condition; 4] = [
        Condition::CieD50,
        Condition::CieD65,
        Condition::YuvSdtv,
        Condition::YpbprSdtv,
    ];

    /// The define name as it appears in library sources.
    pub fn name(self) -> &'static str {
        match self {
            Condition::CieD50 => "CIE_D50",
            Condition::CieD65 => "CIE_D65",
            Condition::YuvSdtv => "YUV_SDTV",
            Condition::YpbprSdtv => "YPBPR_SDTV",
        }
    }

    pub fn group(self) -> Option<ConditionGroup> {
        match self {
            Condition::CieD50 | Condition::CieD65 => Some(ConditionGroup::Illuminant),
            Condition::YuvSdtv | Condition::YpbprSdtv => None,
        }
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Condition {
    type Err = AssemblyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Condition::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| AssemblyError::UnknownCondition(s.to_string()))
    }
}

/// Flag → enabled mapping for one test case.
///
/// Iteration order is the enum order, so two sets with the same contents
/// always render the same directives.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionSet {
    flags: BTreeMap<Condition, bool>,
}

impl ConditionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style `set`.
    pub fn with(mut self, condition: Condition, enabled: bool) -> Self {
        self.set(condition, enabled);
        self
    }

    pub fn set(&mut self, condition: Condition, enabled: bool) {
        self.flags.insert(condition, enabled);
    }

    /// Parse string-keyed flags, e.g. `[("CIE_D50", true)]`.
    pub fn from_pairs<'a, I>(pairs: I) -> Result<Self, AssemblyError>
    where
        I: IntoIterator<Item = (&'a str, bool)>,
    {
        let mut set = ConditionSet::new();
        for (name, enabled) in pairs {
            set.set(name.parse()?, enabled);
        }
        Ok(set)
    }

    /// A flag that is absent or explicitly `false` is not enabled.
    pub fn is_enabled(&self, condition: Condition) -> bool {
        self.flags.get(&condition).copied().unwrap_or(false)
    }

    /// Enabled flags in stable order.
    pub fn enabled(&self) -> impl Iterator<Item = Condition> + '_ {
        self.flags.iter().filter(|(_, on)| **on).map(|(c, _)| *c)
    }

    pub fn is_empty(&self) -> bool {
        self.enabled().next().is_none()
    }

    /// Reject two enabled flags from the same exclusive group.
    pub fn validate(&self) -> Result<(), AssemblyError> {
        let enabled: Vec<Condition> = self.enabled().collect();
        for (i, &first) in enabled.iter().enumerate() {
            let Some(group) = first.group() else { continue };
            if let Some(&second) = enabled[i + 1..].iter().find(|c| c.group() == Some(group)) {
                return Err(AssemblyError::ConflictingConditions {
                    first,
                    second,
                    group: group.name(),
                });
            }
        }
        Ok(())
    }
}

impl FromIterator<(Condition, bool)> for ConditionSet {
    fn from_iter<T: IntoIterator<Item = (Condition, bool)>>(iter: T) -> Self {
        let mut set = ConditionSet::new();
        for (c, on) in iter {
            set.set(c, on);
        }
        set
    }
}

impl From<Condition> for ConditionSet {
    fn from(condition: Condition) -> Self {
        ConditionSet::new().with(condition, true)
    }
}
