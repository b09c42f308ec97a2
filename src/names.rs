//! Case-insensitive name tables for the algorithm selectors.
//!
//! Every selector stored in a container header is written by name and read
//! back by a case-insensitive lookup in a fixed, ordered table. Names that
//! match nothing resolve to the `Unknown` variant, which no operation
//! accepts.

macro_rules! name_table {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $($variant:ident => $label:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant,)+
            Unknown,
        }

        impl $name {
            /// Every known variant, in table order.
            pub const ALL: &'static [$name] = &[$($name::$variant,)+];

            /// Returns the canonical name written to container headers.
            pub fn name(self) -> &'static str {
                match self {
                    $($name::$variant => $label,)+
                    $name::Unknown => "",
                }
            }

            /// Looks a name up case-insensitively; unmatched names yield `Unknown`.
            pub fn from_name(name: &str) -> Self {
                let name = name.trim();
                Self::ALL
                    .iter()
                    .copied()
                    .find(|candidate| candidate.name().eq_ignore_ascii_case(name))
                    .unwrap_or($name::Unknown)
            }

            pub fn is_known(self) -> bool {
                self != $name::Unknown
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $name::Unknown => f.write_str("unknown"),
                    known => f.write_str(known.name()),
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = crate::error::Error;

            /// Strict lookup: unmatched names are `NotImplemented`.
            fn from_str(name: &str) -> Result<Self, Self::Err> {
                match Self::from_name(name) {
                    $name::Unknown => Err(crate::error::Error::NotImplemented),
                    known => Ok(known),
                }
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.name())
            }
        }

        impl<'de> serde::Deserialize<'de> for $name {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let name = <String as serde::Deserialize>::deserialize(deserializer)?;
                Ok(Self::from_name(&name))
            }
        }
    };
}
