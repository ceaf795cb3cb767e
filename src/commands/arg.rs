use bytes::Bytes;

/// A single command argument, already converted to the bytes sent on the wire.
///
/// Numbers are sent as their decimal text, strings as their UTF-8 bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Arg(Bytes);

impl Arg {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for Arg {
    fn from(value: Bytes) -> Self {
        Arg(value)
    }
}

impl From<&Bytes> for Arg {
    fn from(value: &Bytes) -> Self {
        Arg(value.clone())
    }
}

impl From<Vec<u8>> for Arg {
    fn from(value: Vec<u8>) -> Self {
        Arg(Bytes::from(value))
    }
}

impl From<&[u8]> for Arg {
    fn from(value: &[u8]) -> Self {
        Arg(Bytes::copy_from_slice(value))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Arg(Bytes::from(value))
    }
}

impl From<&String> for Arg {
    fn from(value: &String) -> Self {
        Arg(Bytes::copy_from_slice(value.as_bytes()))
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Arg(Bytes::copy_from_slice(value.as_bytes()))
    }
}

macro_rules! impl_numeric_arg {
    ($($t:ty),*) => {
        $(
            impl From<$t> for Arg {
                fn from(value: $t) -> Self {
                    Arg(Bytes::from(value.to_string()))
                }
            }
        )*
    };
}

impl_numeric_arg!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize, f32, f64);

/// Conversion of a group of values into positional command arguments.
///
/// Implemented for `()`, vectors, arrays, slices and tuples of up to eight values, so that
/// arguments of different types can be mixed: `("counter", 5)`.
pub trait IntoArgs {
    fn into_args(self) -> Vec<Arg>;
}

impl IntoArgs for () {
    fn into_args(self) -> Vec<Arg> {
        vec![]
    }
}

impl<T: Into<Arg>> IntoArgs for Vec<T> {
    fn into_args(self) -> Vec<Arg> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<Arg>, const N: usize> IntoArgs for [T; N] {
    fn into_args(self) -> Vec<Arg> {
        self.into_iter().map(Into::into).collect()
    }
}

impl<T: Into<Arg> + Clone> IntoArgs for &[T] {
    fn into_args(self) -> Vec<Arg> {
        self.iter().cloned().map(Into::into).collect()
    }
}

macro_rules! impl_tuple_args {
    ($($name:ident),+) => {
        impl<$($name: Into<Arg>),+> IntoArgs for ($($name,)+) {
            #[allow(non_snake_case)]
            fn into_args(self) -> Vec<Arg> {
                let ($($name,)+) = self;
                vec![$($name.into()),+]
            }
        }
    };
}

impl_tuple_args!(A);
impl_tuple_args!(A, B);
impl_tuple_args!(A, B, C);
impl_tuple_args!(A, B, C, D);
impl_tuple_args!(A, B, C, D, E);
impl_tuple_args!(A, B, C, D, E, F);
impl_tuple_args!(A, B, C, D, E, F, G);
impl_tuple_args!(A, B, C, D, E, F, G, H);
