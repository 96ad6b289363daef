//! Fixed-width element types accepted by `Buffer::copy_bytes_from`

/// Numeric element of a typed view, copied in native byte order
pub trait TypedElement: Copy + Send + Sync + 'static {
    /// Size of one element in bytes
    const WIDTH: usize;

    fn extend_ne_bytes(&self, out: &mut Vec<u8>);
}

macro_rules! typed_element {
    ($($ty:ty),* $(,)?) => {
        $(
            impl TypedElement for $ty {
                const WIDTH: usize = std::mem::size_of::<$ty>();

                #[inline]
                fn extend_ne_bytes(&self, out: &mut Vec<u8>) {
                    out.extend_from_slice(&self.to_ne_bytes());
                }
            }
        )*
    };
}

typed_element!(u8, i8, u16, i16, u32, i32, u64, i64, f32, f64);

/// Serialise `elements[offset..offset + length]` (clamped to the view) into
/// a fresh byte vector.
pub(crate) fn element_bytes<T: TypedElement>(
    elements: &[T],
    offset: usize,
    length: Option<usize>,
) -> Vec<u8> {
    let start = offset.min(elements.len());
    let end = match length {
        Some(length) => start.saturating_add(length).min(elements.len()),
        None => elements.len(),
    };

    let mut out = Vec::with_capacity((end - start) * T::WIDTH);
    for element in &elements[start..end] {
        element.extend_ne_bytes(&mut out);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_widths() {
        assert_eq!(<u8 as TypedElement>::WIDTH, 1);
        assert_eq!(<u16 as TypedElement>::WIDTH, 2);
        assert_eq!(<f64 as TypedElement>::WIDTH, 8);
    }

    #[test]
    fn test_element_bytes_slice() {
        let view = [1u16, 0xffff, 3];
        assert_eq!(element_bytes(&view, 1, Some(1)), vec![0xff, 0xff]);
        assert_eq!(element_bytes(&view, 2, None), 3u16.to_ne_bytes().to_vec());
    }

    #[test]
    fn test_element_bytes_clamps() {
        let view = [1u8, 2, 3];
        assert_eq!(element_bytes(&view, 1, Some(10)), vec![2, 3]);
        assert!(element_bytes(&view, 5, None).is_empty());
    }
}
