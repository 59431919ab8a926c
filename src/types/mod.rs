/// Error for a string that is not one of an enum's wire values
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} '{value}' (allowed: {})", .allowed.join(", "))]
pub struct UnknownVariant {
    pub kind: &'static str,
    pub value: String,
    pub allowed: &'static [&'static str],
}

/// Declares a snake_case string-backed enum with `as_str`, `FromStr`,
/// `Display`, serde and a `ALL` listing of wire values.
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident ($kind:literal) {
            $($variant:ident => $wire:literal),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [&'static str] = &[$($wire),+];

            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $wire),+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = $crate::types::UnknownVariant;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s.trim() {
                    $($wire => Ok($name::$variant),)+
                    other => Err($crate::types::UnknownVariant {
                        kind: $kind,
                        value: other.to_string(),
                        allowed: Self::ALL,
                    }),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

pub(crate) use string_enum;

pub mod enums;
pub mod transitions;

pub use enums::*;
pub use transitions::{allowed_transitions, can_transition};
