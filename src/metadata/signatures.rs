//! Type, method and member signatures.
//!
//! Signatures embed tokens (class and value type references), so the rewriter remaps them like
//! any other reference through [`TypeSig::map_tokens`]. Their binary form follows the ECMA-335
//! blob encoding (II.23.2) with `TypeDefOrRef` coded indices; [`MemberSig::describe`] produces
//! the canonical text form used to match members across modules, e.g. `void(int32,N.T)`.

use std::fmt::Write;

use crate::{
    file::{io::push_compressed_uint, parser::Parser},
    metadata::token::Token,
    Result,
};

/// Element type codes (ECMA-335 II.23.1.16)
#[allow(non_snake_case, missing_docs)]
pub mod ELEMENT_TYPE {
    pub const VOID: u8 = 0x01;
    pub const BOOLEAN: u8 = 0x02;
    pub const CHAR: u8 = 0x03;
    pub const I1: u8 = 0x04;
    pub const U1: u8 = 0x05;
    pub const I2: u8 = 0x06;
    pub const U2: u8 = 0x07;
    pub const I4: u8 = 0x08;
    pub const U4: u8 = 0x09;
    pub const I8: u8 = 0x0a;
    pub const U8: u8 = 0x0b;
    pub const R4: u8 = 0x0c;
    pub const R8: u8 = 0x0d;
    pub const STRING: u8 = 0x0e;
    pub const PTR: u8 = 0x0f;
    pub const BYREF: u8 = 0x10;
    pub const VALUETYPE: u8 = 0x11;
    pub const CLASS: u8 = 0x12;
    pub const VAR: u8 = 0x13;
    pub const GENERICINST: u8 = 0x15;
    pub const I: u8 = 0x18;
    pub const U: u8 = 0x19;
    pub const OBJECT: u8 = 0x1c;
    pub const SZARRAY: u8 = 0x1d;
    pub const MVAR: u8 = 0x1e;
}

const CALLING_CONVENTION_DEFAULT: u8 = 0x00;
const CALLING_CONVENTION_FIELD: u8 = 0x06;
const CALLING_CONVENTION_GENERIC: u8 = 0x10;
const CALLING_CONVENTION_HAS_THIS: u8 = 0x20;

/// A type inside a signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum TypeSig {
    Void,
    Boolean,
    Char,
    I1,
    U1,
    I2,
    U2,
    I4,
    U4,
    I8,
    U8,
    R4,
    R8,
    String,
    I,
    U,
    Object,
    /// Reference type, `TypeDef` or `TypeRef` token
    Class(Token),
    /// Value type, `TypeDef` or `TypeRef` token
    ValueType(Token),
    /// Single dimension, zero based array
    SzArray(Box<TypeSig>),
    /// Managed reference
    ByRef(Box<TypeSig>),
    /// Unmanaged pointer
    Ptr(Box<TypeSig>),
    /// Generic type parameter by index
    Var(u32),
    /// Generic method parameter by index
    MVar(u32),
    /// Generic instantiation: the `Class`/`ValueType` base and its arguments
    GenericInst(Box<TypeSig>, Vec<TypeSig>),
}

impl TypeSig {
    /// Calls `f` for every token embedded in this signature.
    pub fn visit_tokens(&self, f: &mut impl FnMut(Token)) {
        match self {
            TypeSig::Class(token) | TypeSig::ValueType(token) => f(*token),
            TypeSig::SzArray(inner) | TypeSig::ByRef(inner) | TypeSig::Ptr(inner) => {
                inner.visit_tokens(f);
            }
            TypeSig::GenericInst(base, args) => {
                base.visit_tokens(f);
                for arg in args {
                    arg.visit_tokens(f);
                }
            }
            _ => {}
        }
    }

    /// Returns a copy with every embedded token replaced through `f`.
    ///
    /// # Errors
    /// Propagates the first error returned by `f`.
    pub fn map_tokens(&self, f: &mut impl FnMut(Token) -> Result<Token>) -> Result<TypeSig> {
        Ok(match self {
            TypeSig::Class(token) => TypeSig::Class(f(*token)?),
            TypeSig::ValueType(token) => TypeSig::ValueType(f(*token)?),
            TypeSig::SzArray(inner) => TypeSig::SzArray(Box::new(inner.map_tokens(f)?)),
            TypeSig::ByRef(inner) => TypeSig::ByRef(Box::new(inner.map_tokens(f)?)),
            TypeSig::Ptr(inner) => TypeSig::Ptr(Box::new(inner.map_tokens(f)?)),
            TypeSig::GenericInst(base, args) => TypeSig::GenericInst(
                Box::new(base.map_tokens(f)?),
                args.iter()
                    .map(|arg| arg.map_tokens(f))
                    .collect::<Result<Vec<_>>>()?,
            ),
            other => other.clone(),
        })
    }

    /// Canonical text form, resolving embedded tokens through `names`.
    pub fn describe(&self, names: &dyn Fn(Token) -> String) -> String {
        let mut out = String::new();
        self.describe_into(&mut out, names);
        out
    }

    fn describe_into(&self, out: &mut String, names: &dyn Fn(Token) -> String) {
        let primitive = match self {
            TypeSig::Void => "void",
            TypeSig::Boolean => "bool",
            TypeSig::Char => "char",
            TypeSig::I1 => "int8",
            TypeSig::U1 => "uint8",
            TypeSig::I2 => "int16",
            TypeSig::U2 => "uint16",
            TypeSig::I4 => "int32",
            TypeSig::U4 => "uint32",
            TypeSig::I8 => "int64",
            TypeSig::U8 => "uint64",
            TypeSig::R4 => "float32",
            TypeSig::R8 => "float64",
            TypeSig::String => "string",
            TypeSig::I => "native int",
            TypeSig::U => "native uint",
            TypeSig::Object => "object",
            TypeSig::Class(token) | TypeSig::ValueType(token) => {
                out.push_str(&names(*token));
                return;
            }
            TypeSig::SzArray(inner) => {
                inner.describe_into(out, names);
                out.push_str("[]");
                return;
            }
            TypeSig::ByRef(inner) => {
                inner.describe_into(out, names);
                out.push('&');
                return;
            }
            TypeSig::Ptr(inner) => {
                inner.describe_into(out, names);
                out.push('*');
                return;
            }
            TypeSig::Var(index) => {
                let _ = write!(out, "!{index}");
                return;
            }
            TypeSig::MVar(index) => {
                let _ = write!(out, "!!{index}");
                return;
            }
            TypeSig::GenericInst(base, args) => {
                base.describe_into(out, names);
                out.push('<');
                for (index, arg) in args.iter().enumerate() {
                    if index > 0 {
                        out.push(',');
                    }
                    arg.describe_into(out, names);
                }
                out.push('>');
                return;
            }
        };
        out.push_str(primitive);
    }

    /// Appends the blob encoding of this type to `buffer`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if an embedded token is neither a `TypeDef` nor a
    /// `TypeRef`.
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let element = match self {
            TypeSig::Void => ELEMENT_TYPE::VOID,
            TypeSig::Boolean => ELEMENT_TYPE::BOOLEAN,
            TypeSig::Char => ELEMENT_TYPE::CHAR,
            TypeSig::I1 => ELEMENT_TYPE::I1,
            TypeSig::U1 => ELEMENT_TYPE::U1,
            TypeSig::I2 => ELEMENT_TYPE::I2,
            TypeSig::U2 => ELEMENT_TYPE::U2,
            TypeSig::I4 => ELEMENT_TYPE::I4,
            TypeSig::U4 => ELEMENT_TYPE::U4,
            TypeSig::I8 => ELEMENT_TYPE::I8,
            TypeSig::U8 => ELEMENT_TYPE::U8,
            TypeSig::R4 => ELEMENT_TYPE::R4,
            TypeSig::R8 => ELEMENT_TYPE::R8,
            TypeSig::String => ELEMENT_TYPE::STRING,
            TypeSig::I => ELEMENT_TYPE::I,
            TypeSig::U => ELEMENT_TYPE::U,
            TypeSig::Object => ELEMENT_TYPE::OBJECT,
            TypeSig::Class(token) => {
                buffer.push(ELEMENT_TYPE::CLASS);
                return push_compressed_uint(buffer, encode_type_def_or_ref(*token)?);
            }
            TypeSig::ValueType(token) => {
                buffer.push(ELEMENT_TYPE::VALUETYPE);
                return push_compressed_uint(buffer, encode_type_def_or_ref(*token)?);
            }
            TypeSig::SzArray(inner) => {
                buffer.push(ELEMENT_TYPE::SZARRAY);
                return inner.encode(buffer);
            }
            TypeSig::ByRef(inner) => {
                buffer.push(ELEMENT_TYPE::BYREF);
                return inner.encode(buffer);
            }
            TypeSig::Ptr(inner) => {
                buffer.push(ELEMENT_TYPE::PTR);
                return inner.encode(buffer);
            }
            TypeSig::Var(index) => {
                buffer.push(ELEMENT_TYPE::VAR);
                return push_compressed_uint(buffer, *index);
            }
            TypeSig::MVar(index) => {
                buffer.push(ELEMENT_TYPE::MVAR);
                return push_compressed_uint(buffer, *index);
            }
            TypeSig::GenericInst(base, args) => {
                buffer.push(ELEMENT_TYPE::GENERICINST);
                base.encode(buffer)?;
                push_compressed_uint(buffer, args.len() as u32)?;
                for arg in args {
                    arg.encode(buffer)?;
                }
                return Ok(());
            }
        };

        buffer.push(element);
        Ok(())
    }

    /// Decodes one type from `parser`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] for unknown element types and
    /// [`crate::Error::OutOfBounds`] for truncated data.
    pub fn decode(parser: &mut Parser) -> Result<TypeSig> {
        let element = parser.read_le::<u8>()?;
        Ok(match element {
            ELEMENT_TYPE::VOID => TypeSig::Void,
            ELEMENT_TYPE::BOOLEAN => TypeSig::Boolean,
            ELEMENT_TYPE::CHAR => TypeSig::Char,
            ELEMENT_TYPE::I1 => TypeSig::I1,
            ELEMENT_TYPE::U1 => TypeSig::U1,
            ELEMENT_TYPE::I2 => TypeSig::I2,
            ELEMENT_TYPE::U2 => TypeSig::U2,
            ELEMENT_TYPE::I4 => TypeSig::I4,
            ELEMENT_TYPE::U4 => TypeSig::U4,
            ELEMENT_TYPE::I8 => TypeSig::I8,
            ELEMENT_TYPE::U8 => TypeSig::U8,
            ELEMENT_TYPE::R4 => TypeSig::R4,
            ELEMENT_TYPE::R8 => TypeSig::R8,
            ELEMENT_TYPE::STRING => TypeSig::String,
            ELEMENT_TYPE::I => TypeSig::I,
            ELEMENT_TYPE::U => TypeSig::U,
            ELEMENT_TYPE::OBJECT => TypeSig::Object,
            ELEMENT_TYPE::CLASS => TypeSig::Class(decode_type_def_or_ref(parser)?),
            ELEMENT_TYPE::VALUETYPE => TypeSig::ValueType(decode_type_def_or_ref(parser)?),
            ELEMENT_TYPE::SZARRAY => TypeSig::SzArray(Box::new(TypeSig::decode(parser)?)),
            ELEMENT_TYPE::BYREF => TypeSig::ByRef(Box::new(TypeSig::decode(parser)?)),
            ELEMENT_TYPE::PTR => TypeSig::Ptr(Box::new(TypeSig::decode(parser)?)),
            ELEMENT_TYPE::VAR => TypeSig::Var(parser.read_compressed_uint()?),
            ELEMENT_TYPE::MVAR => TypeSig::MVar(parser.read_compressed_uint()?),
            ELEMENT_TYPE::GENERICINST => {
                let base = TypeSig::decode(parser)?;
                if !matches!(base, TypeSig::Class(_) | TypeSig::ValueType(_)) {
                    return Err(malformed_error!(
                        "Generic instantiation over non-type base at offset {}",
                        parser.pos()
                    ));
                }

                let count = parser.read_count()?;
                let mut args = Vec::with_capacity(count);
                for _ in 0..count {
                    args.push(TypeSig::decode(parser)?);
                }
                TypeSig::GenericInst(Box::new(base), args)
            }
            _ => {
                return Err(malformed_error!(
                    "Unsupported element type 0x{:02x} at offset {}",
                    element,
                    parser.pos() - 1
                ))
            }
        })
    }
}

/// A method signature (II.23.2.1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MethodSig {
    /// Instance method (`this` is passed implicitly)
    pub has_this: bool,
    /// Number of generic method parameters
    pub generic_params: u32,
    /// Return type
    pub ret: TypeSig,
    /// Parameter types
    pub params: Vec<TypeSig>,
}

impl MethodSig {
    /// A static method signature.
    #[must_use]
    pub fn new_static(ret: TypeSig, params: Vec<TypeSig>) -> Self {
        MethodSig {
            has_this: false,
            generic_params: 0,
            ret,
            params,
        }
    }

    /// An instance method signature.
    #[must_use]
    pub fn new_instance(ret: TypeSig, params: Vec<TypeSig>) -> Self {
        MethodSig {
            has_this: true,
            generic_params: 0,
            ret,
            params,
        }
    }

    /// Calls `f` for every token embedded in the return and parameter types.
    pub fn visit_tokens(&self, f: &mut impl FnMut(Token)) {
        self.ret.visit_tokens(f);
        for param in &self.params {
            param.visit_tokens(f);
        }
    }

    /// Returns a copy with every embedded token replaced through `f`.
    ///
    /// # Errors
    /// Propagates the first error returned by `f`.
    pub fn map_tokens(&self, f: &mut impl FnMut(Token) -> Result<Token>) -> Result<MethodSig> {
        Ok(MethodSig {
            has_this: self.has_this,
            generic_params: self.generic_params,
            ret: self.ret.map_tokens(f)?,
            params: self
                .params
                .iter()
                .map(|param| param.map_tokens(f))
                .collect::<Result<Vec<_>>>()?,
        })
    }

    /// Canonical text form, e.g. `void(int32,N.T)` or `!!0``1(!!0)` for generic methods.
    pub fn describe(&self, names: &dyn Fn(Token) -> String) -> String {
        let mut out = self.ret.describe(names);
        if self.generic_params > 0 {
            let _ = write!(out, "``{}", self.generic_params);
        }
        out.push('(');
        for (index, param) in self.params.iter().enumerate() {
            if index > 0 {
                out.push(',');
            }
            out.push_str(&param.describe(names));
        }
        out.push(')');
        out
    }

    /// Appends the blob encoding of this signature to `buffer`.
    ///
    /// # Errors
    /// See [`TypeSig::encode`].
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let mut convention = CALLING_CONVENTION_DEFAULT;
        if self.has_this {
            convention |= CALLING_CONVENTION_HAS_THIS;
        }
        if self.generic_params > 0 {
            convention |= CALLING_CONVENTION_GENERIC;
        }
        buffer.push(convention);

        if self.generic_params > 0 {
            push_compressed_uint(buffer, self.generic_params)?;
        }
        push_compressed_uint(buffer, self.params.len() as u32)?;
        self.ret.encode(buffer)?;
        for param in &self.params {
            param.encode(buffer)?;
        }
        Ok(())
    }

    fn decode_after_convention(parser: &mut Parser, convention: u8) -> Result<MethodSig> {
        let generic_params = if convention & CALLING_CONVENTION_GENERIC != 0 {
            parser.read_compressed_uint()?
        } else {
            0
        };

        let count = parser.read_count()?;
        let ret = TypeSig::decode(parser)?;
        let mut params = Vec::with_capacity(count);
        for _ in 0..count {
            params.push(TypeSig::decode(parser)?);
        }

        Ok(MethodSig {
            has_this: convention & CALLING_CONVENTION_HAS_THIS != 0,
            generic_params,
            ret,
            params,
        })
    }

    /// Decodes a method signature from `parser`.
    ///
    /// # Errors
    /// Returns [`crate::Error::Malformed`] if the blob holds a field signature.
    pub fn decode(parser: &mut Parser) -> Result<MethodSig> {
        let convention = parser.read_le::<u8>()?;
        if convention & 0x0F == CALLING_CONVENTION_FIELD {
            return Err(malformed_error!("Expected method signature, found field"));
        }
        Self::decode_after_convention(parser, convention)
    }
}

/// The signature of a member reference: either a field type or a method signature.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MemberSig {
    /// Field signature
    Field(TypeSig),
    /// Method signature
    Method(MethodSig),
}

impl MemberSig {
    /// Calls `f` for every embedded token.
    pub fn visit_tokens(&self, f: &mut impl FnMut(Token)) {
        match self {
            MemberSig::Field(sig) => sig.visit_tokens(f),
            MemberSig::Method(sig) => sig.visit_tokens(f),
        }
    }

    /// Returns a copy with every embedded token replaced through `f`.
    ///
    /// # Errors
    /// Propagates the first error returned by `f`.
    pub fn map_tokens(&self, f: &mut impl FnMut(Token) -> Result<Token>) -> Result<MemberSig> {
        Ok(match self {
            MemberSig::Field(sig) => MemberSig::Field(sig.map_tokens(f)?),
            MemberSig::Method(sig) => MemberSig::Method(sig.map_tokens(f)?),
        })
    }

    /// Canonical text form.
    pub fn describe(&self, names: &dyn Fn(Token) -> String) -> String {
        match self {
            MemberSig::Field(sig) => sig.describe(names),
            MemberSig::Method(sig) => sig.describe(names),
        }
    }

    /// Appends the blob encoding to `buffer`.
    ///
    /// # Errors
    /// See [`TypeSig::encode`].
    pub fn encode(&self, buffer: &mut Vec<u8>) -> Result<()> {
        match self {
            MemberSig::Field(sig) => {
                buffer.push(CALLING_CONVENTION_FIELD);
                sig.encode(buffer)
            }
            MemberSig::Method(sig) => sig.encode(buffer),
        }
    }

    /// Decodes a field or method signature from `parser`.
    ///
    /// # Errors
    /// See [`TypeSig::decode`].
    pub fn decode(parser: &mut Parser) -> Result<MemberSig> {
        let convention = parser.read_le::<u8>()?;
        if convention & 0x0F == CALLING_CONVENTION_FIELD {
            Ok(MemberSig::Field(TypeSig::decode(parser)?))
        } else {
            Ok(MemberSig::Method(MethodSig::decode_after_convention(
                parser, convention,
            )?))
        }
    }
}

/// Encodes a `TypeDef` or `TypeRef` token as a `TypeDefOrRef` coded index (II.24.2.6).
fn encode_type_def_or_ref(token: Token) -> Result<u32> {
    match token.table() {
        Token::TYPE_DEF => Ok(token.row() << 2),
        Token::TYPE_REF => Ok((token.row() << 2) | 1),
        table => Err(malformed_error!(
            "Invalid token table 0x{:02x} for TypeDefOrRef coded index: {}",
            table,
            token
        )),
    }
}

fn decode_type_def_or_ref(parser: &mut Parser) -> Result<Token> {
    let coded = parser.read_compressed_uint()?;
    let table = match coded & 0x3 {
        0 => Token::TYPE_DEF,
        1 => Token::TYPE_REF,
        tag => return Err(malformed_error!("Unsupported TypeDefOrRef tag {}", tag)),
    };
    Ok(Token::from_parts(table, coded >> 2))
}
