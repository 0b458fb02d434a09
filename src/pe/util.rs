//! `nom` plumbing shared by the PE decoders, carried over from the teacher's
//! `pe::util` almost unchanged: a `nom::IResult` alias plus the
//! `impl_parse_for_enum!` macro that turns a `TryFrom<uN>` enum into a
//! `nom` parser.

pub type Input<'a> = &'a [u8];
pub type NomResult<'a, O> = nom::IResult<Input<'a>, O, nom::error::VerboseError<Input<'a>>>;

#[macro_export]
macro_rules! impl_parse_for_enum {
    ($type: ident, $number_parser: ident) => {
        impl $type {
            pub fn parse(i: $crate::pe::util::Input) -> $crate::pe::util::NomResult<Self> {
                use nom::{
                    combinator::map_res,
                    error::{context, ErrorKind},
                    number::complete::$number_parser,
                };
                let parser = map_res($number_parser, |x| {
                    Self::try_from(x).map_err(|_| ErrorKind::Alt)
                });
                context(stringify!($type), parser)(i)
            }
        }
    };
}
