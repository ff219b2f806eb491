//! Fixed binary layouts of the result records read from the database.
//!
//! Each record is a flat C struct of 4-byte integers and floats in native
//! byte order. Records are decoded field by field out of the cursor's byte
//! buffer; the serialized field names are the engine's own.

use serde::{Deserialize, Serialize};

/// A record kind readable through [`super::RecordCursor`].
pub trait CdbRecord: Sized {
    /// Record-kind code (`kwh`) of this layout.
    const KEY: i32;
    /// Size of the native struct in bytes.
    const SIZE: usize;

    /// Copy a record out of a native buffer. Missing trailing bytes read as 0.
    fn decode(bytes: &[u8]) -> Self;

    /// Native byte representation, the inverse of [`decode`](Self::decode).
    fn encode(&self) -> Vec<u8>;
}

/// A scalar that appears in a native record.
pub trait NativeField: Sized {
    const SIZE: usize;
    fn read(bytes: &[u8], offset: &mut usize) -> Self;
    fn write(&self, out: &mut Vec<u8>);
}

macro_rules! native_field {
    ($ty:ty) => {
        impl NativeField for $ty {
            const SIZE: usize = std::mem::size_of::<$ty>();

            fn read(bytes: &[u8], offset: &mut usize) -> Self {
                let mut raw = [0u8; std::mem::size_of::<$ty>()];
                if let Some(src) = bytes.get(*offset..*offset + raw.len()) {
                    raw.copy_from_slice(src);
                }
                *offset += raw.len();
                <$ty>::from_ne_bytes(raw)
            }

            fn write(&self, out: &mut Vec<u8>) {
                out.extend_from_slice(&self.to_ne_bytes());
            }
        }
    };
}

native_field!(i32);
native_field!(f32);

macro_rules! cdb_record {
    (
        $(#[$meta:meta])*
        $name:ident = $key:literal {
            $( $(#[$field_meta:meta])* $field:ident : $ty:ty ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
        pub struct $name {
            $( $(#[$field_meta])* pub $field: $ty, )+
        }

        impl CdbRecord for $name {
            const KEY: i32 = $key;
            const SIZE: usize = 0 $( + <$ty as NativeField>::SIZE )+;

            fn decode(bytes: &[u8]) -> Self {
                let mut offset = 0;
                Self {
                    $( $field: <$ty as NativeField>::read(bytes, &mut offset), )+
                }
            }

            fn encode(&self) -> Vec<u8> {
                let mut out = Vec::with_capacity(Self::SIZE);
                $( self.$field.write(&mut out); )+
                out
            }
        }
    };
}

cdb_record! {
    /// Truss element results (key 152).
    TrussResult = 152 {
        /// Element number.
        m_nr: i32,
        /// Normal force.
        m_n: f32,
        /// Axial displacement.
        m_v: f32,
        /// Nonlinear effective normal force.
        m_nm: f32,
    }
}

cdb_record! {
    /// Nodal displacements and support reactions (key 24).
    NodeResult = 24 {
        /// Node number.
        m_nr: i32,
        m_ux: f32,
        m_uy: f32,
        m_uz: f32,
        m_urx: f32,
        m_ury: f32,
        m_urz: f32,
        /// Warping.
        m_urb: f32,
        /// Support reaction forces.
        m_px: f32,
        m_py: f32,
        m_pz: f32,
        /// Support reaction moments.
        m_mx: f32,
        m_my: f32,
        m_mz: f32,
        m_mb: f32,
    }
}

cdb_record! {
    /// Maximum forces of quad elements (key 210).
    QuadForces = 210 {
        /// Element number.
        m_nr: i32,
        m_mxx: f32,
        m_myy: f32,
        m_mxy: f32,
        m_vx: f32,
        m_vy: f32,
        m_nx: f32,
        m_ny: f32,
        m_nxy: f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_sizes() {
        assert_eq!(TrussResult::SIZE, 16);
        assert_eq!(NodeResult::SIZE, 60);
        assert_eq!(QuadForces::SIZE, 36);
    }

    #[test]
    fn decode_reads_fields_in_declaration_order() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&7i32.to_ne_bytes());
        bytes.extend_from_slice(&(-12.5f32).to_ne_bytes());
        bytes.extend_from_slice(&0.25f32.to_ne_bytes());
        bytes.extend_from_slice(&1.0f32.to_ne_bytes());

        let truss = TrussResult::decode(&bytes);
        assert_eq!(
            truss,
            TrussResult {
                m_nr: 7,
                m_n: -12.5,
                m_v: 0.25,
                m_nm: 1.0
            }
        );
        assert_eq!(truss.encode(), bytes);
    }

    #[test]
    fn short_buffer_leaves_trailing_fields_zero() {
        let bytes = 3i32.to_ne_bytes();
        let quad = QuadForces::decode(&bytes);
        assert_eq!(quad.m_nr, 3);
        assert_eq!(quad.m_nxy, 0.0);
    }

    #[test]
    fn serializes_with_engine_field_names() {
        let node = NodeResult {
            m_nr: 1,
            m_uz: -0.5,
            ..Default::default()
        };
        let json = serde_json::to_value(node).unwrap();
        assert_eq!(json["m_nr"], 1);
        assert_eq!(json["m_uz"], -0.5);
        assert_eq!(json.as_object().unwrap().len(), 15);
    }
}
