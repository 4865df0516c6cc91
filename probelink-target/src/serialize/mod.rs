mod hex_range;
mod hex_u_int;

pub(crate) use hex_range::deserialize as deserialize_hex_range;
pub(crate) use hex_range::serialize as hex_range;
pub(crate) use hex_u_int::deserialize as deserialize_hex_u_int;
pub(crate) use hex_u_int::deserialize_option as deserialize_hex_option;
pub(crate) use hex_u_int::serialize as hex_u_int;
pub(crate) use hex_u_int::serialize_option as hex_option;

/// Unsigned integers which are written out as hex strings in human readable formats.
pub trait SerializeUnsignedInt: std::fmt::LowerHex {
    fn serialize_int<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer;
}

macro_rules! impl_serialize_unsigned {
    ($($ty:ty => $method:ident),* $(,)?) => {
        $(
            impl SerializeUnsignedInt for $ty {
                fn serialize_int<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
                where
                    S: serde::Serializer,
                {
                    serializer.$method(*self)
                }
            }
        )*
    };
}

impl_serialize_unsigned!(u8 => serialize_u8, u16 => serialize_u16, u32 => serialize_u32, u64 => serialize_u64);
