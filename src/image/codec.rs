//! The bundled binary module format.
//!
//! Layout (all integers little-endian, counts ECMA-335 compressed, strings and blobs 7-bit
//! length prefixed):
//!
//! ```text
//! magic "DRPK" | version u16 | reserved u16 | payload length u32
//! identity | kind u8 | platform | mvid [16]
//! references | type refs | member refs | types (recursive) | resources | attributes
//! entry point u32 | signature slot (bool + blob)
//! ```
//!
//! The encoding is canonical: equal modules always produce equal bytes.

use crate::{
    file::{
        io::{
            push_7bit_encoded_int, push_compressed_uint, push_le, push_prefixed_string_utf8,
            write_le_at,
        },
        parser::Parser,
    },
    image::{symbols, EncodedImage, ModuleReader, ModuleWriter},
    metadata::{
        attributes::{AttributeValue, CustomAttribute, NamedArgument},
        body::{ExceptionHandler, ExceptionHandlerKind, Instruction, MethodBody, Operand},
        flags::{FieldAttributes, ManifestResourceAttributes, MethodAttributes, TypeAttributes},
        identity::{Identity, ModuleIdentity, ModuleVersion},
        module::{MemberRef, Module, ModuleKind, ResolutionScope, Resource, TypeRef},
        signatures::{MemberSig, MethodSig, TypeSig},
        token::Token,
        typedef::{EventDef, FieldDef, MethodDef, PropertyDef, TypeDef},
    },
    Result,
};

const MAGIC: &[u8; 4] = b"DRPK";
const FORMAT_VERSION: u16 = 1;
const HEADER_SIZE: usize = 12;
const MAX_NESTING: usize = 64;

/// [`ModuleReader`] and [`ModuleWriter`] for the bundled image format.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImageCodec;

impl ModuleWriter for ImageCodec {
    fn write(&self, module: &Module) -> Result<EncodedImage> {
        let mut buffer = Vec::with_capacity(4096);
        buffer.extend_from_slice(MAGIC);
        push_le(&mut buffer, FORMAT_VERSION);
        push_le(&mut buffer, 0u16);
        push_le(&mut buffer, 0u32);

        write_identity(&mut buffer, &module.identity);
        buffer.push(kind_to_byte(module.kind));
        push_prefixed_string_utf8(&mut buffer, &module.target_platform);
        let mvid_offset = buffer.len();
        buffer.extend_from_slice(&module.mvid.to_bytes());

        push_count(&mut buffer, module.references.len())?;
        for reference in &module.references {
            write_identity(&mut buffer, reference);
        }

        push_count(&mut buffer, module.type_refs.len())?;
        for type_ref in &module.type_refs {
            push_le(&mut buffer, type_ref.token.value());
            match type_ref.scope {
                ResolutionScope::Reference(index) => {
                    buffer.push(0);
                    push_le(&mut buffer, index);
                }
                ResolutionScope::Enclosing(outer) => {
                    buffer.push(1);
                    push_le(&mut buffer, outer.value());
                }
                ResolutionScope::Local => buffer.push(2),
            }
            push_prefixed_string_utf8(&mut buffer, &type_ref.namespace);
            push_prefixed_string_utf8(&mut buffer, &type_ref.name);
        }

        push_count(&mut buffer, module.member_refs.len())?;
        for member in &module.member_refs {
            push_le(&mut buffer, member.token.value());
            push_le(&mut buffer, member.parent.value());
            push_prefixed_string_utf8(&mut buffer, &member.name);
            member.signature.encode(&mut buffer)?;
        }

        push_count(&mut buffer, module.types.len())?;
        for ty in &module.types {
            write_type(&mut buffer, ty)?;
        }

        push_count(&mut buffer, module.resources.len())?;
        for resource in &module.resources {
            push_prefixed_string_utf8(&mut buffer, &resource.name);
            push_le(&mut buffer, resource.flags.bits());
            push_blob(&mut buffer, &resource.data);
        }

        write_attributes(&mut buffer, &module.attributes)?;
        push_token(&mut buffer, module.entry_point);

        let signature_slot = match &module.signature {
            Some(signature) => {
                buffer.push(1);
                push_7bit_encoded_int(&mut buffer, signature.len() as u32);
                let offset = buffer.len();
                buffer.extend_from_slice(signature);
                Some((offset, signature.len()))
            }
            None => {
                buffer.push(0);
                None
            }
        };

        let payload = u32::try_from(buffer.len() - HEADER_SIZE)
            .map_err(|_| malformed_error!("Image exceeds 4 GiB"))?;
        let mut offset = 8;
        write_le_at(&mut buffer, &mut offset, payload)?;

        Ok(EncodedImage {
            bytes: buffer,
            mvid_offset,
            signature_slot,
        })
    }

    fn write_symbols(&self, module: &Module) -> Result<Vec<u8>> {
        symbols::encode(module)
    }
}

impl ModuleReader for ImageCodec {
    fn read(&self, data: &[u8]) -> Result<Module> {
        let mut parser = Parser::new(data);

        if parser.read_bytes(4)? != MAGIC {
            return Err(malformed_error!("Not a module image - invalid magic"));
        }
        let version = parser.read_le::<u16>()?;
        if version != FORMAT_VERSION {
            return Err(malformed_error!("Unsupported image version {}", version));
        }
        parser.advance_by(2)?;
        let payload = parser.read_le::<u32>()? as usize;
        if payload != data.len() - HEADER_SIZE {
            return Err(malformed_error!(
                "Image payload length {} does not match file length {}",
                payload,
                data.len()
            ));
        }

        let identity = read_identity(&mut parser)?;
        let kind = byte_to_kind(parser.read_le::<u8>()?)?;
        let mut module = Module::new(identity, kind);
        module.target_platform = parser.read_prefixed_string_utf8()?;

        let mut mvid = [0u8; 16];
        mvid.copy_from_slice(parser.read_bytes(16)?);
        module.mvid = uguid::Guid::from_bytes(mvid);

        for _ in 0..parser.read_count()? {
            module.references.push(read_identity(&mut parser)?);
        }

        for _ in 0..parser.read_count()? {
            let token = parser.read_token()?;
            let scope = match parser.read_le::<u8>()? {
                0 => ResolutionScope::Reference(parser.read_le::<u32>()?),
                1 => ResolutionScope::Enclosing(parser.read_token()?),
                2 => ResolutionScope::Local,
                tag => return Err(malformed_error!("Invalid resolution scope tag {}", tag)),
            };
            module.type_refs.push(TypeRef {
                token,
                scope,
                namespace: parser.read_prefixed_string_utf8()?,
                name: parser.read_prefixed_string_utf8()?,
            });
        }

        for _ in 0..parser.read_count()? {
            module.member_refs.push(MemberRef {
                token: parser.read_token()?,
                parent: parser.read_token()?,
                name: parser.read_prefixed_string_utf8()?,
                signature: MemberSig::decode(&mut parser)?,
            });
        }

        for _ in 0..parser.read_count()? {
            module.types.push(read_type(&mut parser, 0)?);
        }

        for _ in 0..parser.read_count()? {
            module.resources.push(Resource {
                name: parser.read_prefixed_string_utf8()?,
                flags: ManifestResourceAttributes::from_bits_retain(parser.read_le::<u32>()?),
                data: parser.read_prefixed_blob()?,
            });
        }

        module.attributes = read_attributes(&mut parser)?;
        module.entry_point = read_optional_token(&mut parser)?;
        if parser.read_bool()? {
            module.signature = Some(parser.read_prefixed_blob()?);
        }

        if parser.has_more_data() {
            return Err(malformed_error!(
                "Trailing data after module image at offset {}",
                parser.pos()
            ));
        }

        Ok(module)
    }

    fn read_symbols(&self, module: &mut Module, data: &[u8]) -> Result<()> {
        symbols::apply(module, data)
    }
}

pub(super) fn push_count(buffer: &mut Vec<u8>, count: usize) -> Result<()> {
    let count = u32::try_from(count).map_err(|_| malformed_error!("Count {} too large", count))?;
    push_compressed_uint(buffer, count)
}

fn push_blob(buffer: &mut Vec<u8>, data: &[u8]) {
    push_7bit_encoded_int(buffer, data.len() as u32);
    buffer.extend_from_slice(data);
}

fn push_token(buffer: &mut Vec<u8>, token: Option<Token>) {
    push_le(buffer, token.map_or(0, |token| token.value()));
}

fn read_optional_token(parser: &mut Parser) -> Result<Option<Token>> {
    let token = parser.read_token()?;
    Ok((!token.is_null()).then_some(token))
}

fn kind_to_byte(kind: ModuleKind) -> u8 {
    match kind {
        ModuleKind::Unspecified => 0,
        ModuleKind::Dll => 1,
        ModuleKind::Exe => 2,
        ModuleKind::WinExe => 3,
    }
}

fn byte_to_kind(value: u8) -> Result<ModuleKind> {
    Ok(match value {
        0 => ModuleKind::Unspecified,
        1 => ModuleKind::Dll,
        2 => ModuleKind::Exe,
        3 => ModuleKind::WinExe,
        _ => return Err(malformed_error!("Invalid module kind {}", value)),
    })
}

fn write_identity(buffer: &mut Vec<u8>, identity: &ModuleIdentity) {
    push_prefixed_string_utf8(buffer, &identity.name);
    push_le(buffer, identity.version.major);
    push_le(buffer, identity.version.minor);
    push_le(buffer, identity.version.build);
    push_le(buffer, identity.version.revision);
    push_prefixed_string_utf8(buffer, identity.culture.as_deref().unwrap_or_default());
    match &identity.strong_name {
        None => buffer.push(0),
        Some(Identity::PubKey(key)) => {
            buffer.push(1);
            push_blob(buffer, key);
        }
        Some(Identity::Token(token)) => {
            buffer.push(2);
            push_le(buffer, *token);
        }
    }
}

fn read_identity(parser: &mut Parser) -> Result<ModuleIdentity> {
    let name = parser.read_prefixed_string_utf8()?;
    let version = ModuleVersion::new(
        parser.read_le::<u16>()?,
        parser.read_le::<u16>()?,
        parser.read_le::<u16>()?,
        parser.read_le::<u16>()?,
    );
    let culture = parser.read_prefixed_string_utf8()?;
    let strong_name = match parser.read_le::<u8>()? {
        0 => None,
        1 => Some(Identity::PubKey(parser.read_prefixed_blob()?)),
        2 => Some(Identity::Token(parser.read_le::<u64>()?)),
        tag => return Err(malformed_error!("Invalid strong name tag {}", tag)),
    };

    Ok(ModuleIdentity {
        name,
        version,
        culture: (!culture.is_empty()).then_some(culture),
        strong_name,
    })
}

fn write_value(buffer: &mut Vec<u8>, value: &AttributeValue) {
    match value {
        AttributeValue::Bool(value) => {
            buffer.push(0);
            buffer.push(u8::from(*value));
        }
        AttributeValue::I32(value) => {
            buffer.push(1);
            push_le(buffer, *value);
        }
        AttributeValue::I64(value) => {
            buffer.push(2);
            push_le(buffer, *value);
        }
        AttributeValue::String(Some(value)) => {
            buffer.push(3);
            push_prefixed_string_utf8(buffer, value);
        }
        AttributeValue::String(None) => buffer.push(4),
        AttributeValue::TypeName(value) => {
            buffer.push(5);
            push_prefixed_string_utf8(buffer, value);
        }
    }
}

fn read_value(parser: &mut Parser) -> Result<AttributeValue> {
    Ok(match parser.read_le::<u8>()? {
        0 => AttributeValue::Bool(parser.read_bool()?),
        1 => AttributeValue::I32(parser.read_le::<i32>()?),
        2 => AttributeValue::I64(parser.read_le::<i64>()?),
        3 => AttributeValue::String(Some(parser.read_prefixed_string_utf8()?)),
        4 => AttributeValue::String(None),
        5 => AttributeValue::TypeName(parser.read_prefixed_string_utf8()?),
        tag => return Err(malformed_error!("Invalid attribute value tag {}", tag)),
    })
}

fn write_attributes(buffer: &mut Vec<u8>, attributes: &[CustomAttribute]) -> Result<()> {
    push_count(buffer, attributes.len())?;
    for attribute in attributes {
        push_le(buffer, attribute.attribute_type.value());
        push_count(buffer, attribute.fixed_args.len())?;
        for value in &attribute.fixed_args {
            write_value(buffer, value);
        }
        push_count(buffer, attribute.named_args.len())?;
        for named in &attribute.named_args {
            buffer.push(u8::from(named.is_field));
            push_prefixed_string_utf8(buffer, &named.name);
            write_value(buffer, &named.value);
        }
    }
    Ok(())
}

fn read_attributes(parser: &mut Parser) -> Result<Vec<CustomAttribute>> {
    let count = parser.read_count()?;
    let mut attributes = Vec::with_capacity(count);
    for _ in 0..count {
        let attribute_type = parser.read_token()?;

        let fixed_count = parser.read_count()?;
        let mut fixed_args = Vec::with_capacity(fixed_count);
        for _ in 0..fixed_count {
            fixed_args.push(read_value(parser)?);
        }

        let named_count = parser.read_count()?;
        let mut named_args = Vec::with_capacity(named_count);
        for _ in 0..named_count {
            named_args.push(NamedArgument {
                is_field: parser.read_bool()?,
                name: parser.read_prefixed_string_utf8()?,
                value: read_value(parser)?,
            });
        }

        attributes.push(CustomAttribute {
            attribute_type,
            fixed_args,
            named_args,
        });
    }
    Ok(attributes)
}

fn write_body(buffer: &mut Vec<u8>, body: &MethodBody) -> Result<()> {
    push_le(buffer, body.max_stack);
    buffer.push(u8::from(body.init_locals));

    push_count(buffer, body.locals.len())?;
    for local in &body.locals {
        local.encode(buffer)?;
    }

    push_count(buffer, body.instructions.len())?;
    for instruction in &body.instructions {
        push_le(buffer, instruction.offset);
        push_le(buffer, instruction.opcode);
        match &instruction.operand {
            Operand::None => buffer.push(0),
            Operand::I32(value) => {
                buffer.push(1);
                push_le(buffer, *value);
            }
            Operand::I64(value) => {
                buffer.push(2);
                push_le(buffer, *value);
            }
            Operand::F64(value) => {
                buffer.push(3);
                push_le(buffer, *value);
            }
            Operand::String(value) => {
                buffer.push(4);
                push_prefixed_string_utf8(buffer, value);
            }
            Operand::Token(token) => {
                buffer.push(5);
                push_le(buffer, token.value());
            }
            Operand::Branch(target) => {
                buffer.push(6);
                push_le(buffer, *target);
            }
            Operand::Switch(targets) => {
                buffer.push(7);
                push_count(buffer, targets.len())?;
                for target in targets {
                    push_le(buffer, *target);
                }
            }
        }
    }

    push_count(buffer, body.exception_handlers.len())?;
    for handler in &body.exception_handlers {
        buffer.push(match handler.kind {
            ExceptionHandlerKind::Catch => 0,
            ExceptionHandlerKind::Filter => 1,
            ExceptionHandlerKind::Finally => 2,
            ExceptionHandlerKind::Fault => 4,
        });
        push_le(buffer, handler.try_offset);
        push_le(buffer, handler.try_length);
        push_le(buffer, handler.handler_offset);
        push_le(buffer, handler.handler_length);
        push_token(buffer, handler.catch_type);
        push_le(buffer, handler.filter_offset);
    }

    Ok(())
}

fn read_body(parser: &mut Parser) -> Result<MethodBody> {
    let max_stack = parser.read_le::<u16>()?;
    let init_locals = parser.read_bool()?;

    let local_count = parser.read_count()?;
    let mut locals = Vec::with_capacity(local_count);
    for _ in 0..local_count {
        locals.push(TypeSig::decode(parser)?);
    }

    let instruction_count = parser.read_count()?;
    let mut instructions = Vec::with_capacity(instruction_count);
    for _ in 0..instruction_count {
        let offset = parser.read_le::<u32>()?;
        let opcode = parser.read_le::<u16>()?;
        let operand = match parser.read_le::<u8>()? {
            0 => Operand::None,
            1 => Operand::I32(parser.read_le::<i32>()?),
            2 => Operand::I64(parser.read_le::<i64>()?),
            3 => Operand::F64(parser.read_le::<f64>()?),
            4 => Operand::String(parser.read_prefixed_string_utf8()?),
            5 => Operand::Token(parser.read_token()?),
            6 => Operand::Branch(parser.read_le::<u32>()?),
            7 => {
                let count = parser.read_count()?;
                let mut targets = Vec::with_capacity(count);
                for _ in 0..count {
                    targets.push(parser.read_le::<u32>()?);
                }
                Operand::Switch(targets)
            }
            tag => return Err(malformed_error!("Invalid operand tag {}", tag)),
        };
        instructions.push(Instruction::new(offset, opcode, operand));
    }

    let handler_count = parser.read_count()?;
    let mut exception_handlers = Vec::with_capacity(handler_count);
    for _ in 0..handler_count {
        let kind = match parser.read_le::<u8>()? {
            0 => ExceptionHandlerKind::Catch,
            1 => ExceptionHandlerKind::Filter,
            2 => ExceptionHandlerKind::Finally,
            4 => ExceptionHandlerKind::Fault,
            tag => return Err(malformed_error!("Invalid exception handler kind {}", tag)),
        };
        exception_handlers.push(ExceptionHandler {
            kind,
            try_offset: parser.read_le::<u32>()?,
            try_length: parser.read_le::<u32>()?,
            handler_offset: parser.read_le::<u32>()?,
            handler_length: parser.read_le::<u32>()?,
            catch_type: read_optional_token(parser)?,
            filter_offset: parser.read_le::<u32>()?,
        });
    }

    Ok(MethodBody {
        max_stack,
        init_locals,
        locals,
        instructions,
        exception_handlers,
        sequence_points: Vec::new(),
    })
}

fn write_type(buffer: &mut Vec<u8>, ty: &TypeDef) -> Result<()> {
    push_le(buffer, ty.token.value());
    push_prefixed_string_utf8(buffer, &ty.namespace);
    push_prefixed_string_utf8(buffer, &ty.name);
    push_le(buffer, ty.flags.bits());
    push_token(buffer, ty.extends);

    push_count(buffer, ty.interfaces.len())?;
    for interface in &ty.interfaces {
        push_le(buffer, interface.value());
    }

    push_count(buffer, ty.generic_params.len())?;
    for param in &ty.generic_params {
        push_prefixed_string_utf8(buffer, param);
    }

    push_count(buffer, ty.fields.len())?;
    for field in &ty.fields {
        push_le(buffer, field.token.value());
        push_prefixed_string_utf8(buffer, &field.name);
        push_le(buffer, field.flags.bits());
        field.signature.encode(buffer)?;
        write_attributes(buffer, &field.attributes)?;
    }

    push_count(buffer, ty.methods.len())?;
    for method in &ty.methods {
        push_le(buffer, method.token.value());
        push_prefixed_string_utf8(buffer, &method.name);
        push_le(buffer, method.flags.bits());
        method.signature.encode(buffer)?;
        match &method.body {
            Some(body) => {
                buffer.push(1);
                write_body(buffer, body)?;
            }
            None => buffer.push(0),
        }
        write_attributes(buffer, &method.attributes)?;
    }

    push_count(buffer, ty.properties.len())?;
    for property in &ty.properties {
        push_le(buffer, property.token.value());
        push_prefixed_string_utf8(buffer, &property.name);
        property.signature.encode(buffer)?;
        push_token(buffer, property.getter);
        push_token(buffer, property.setter);
        write_attributes(buffer, &property.attributes)?;
    }

    push_count(buffer, ty.events.len())?;
    for event in &ty.events {
        push_le(buffer, event.token.value());
        push_prefixed_string_utf8(buffer, &event.name);
        push_le(buffer, event.event_type.value());
        push_token(buffer, event.add);
        push_token(buffer, event.remove);
        write_attributes(buffer, &event.attributes)?;
    }

    push_count(buffer, ty.nested.len())?;
    for nested in &ty.nested {
        write_type(buffer, nested)?;
    }

    write_attributes(buffer, &ty.attributes)
}

fn read_type(parser: &mut Parser, depth: usize) -> Result<TypeDef> {
    if depth > MAX_NESTING {
        return Err(malformed_error!(
            "Type nesting deeper than {} at offset {}",
            MAX_NESTING,
            parser.pos()
        ));
    }

    let token = parser.read_token()?;
    let namespace = parser.read_prefixed_string_utf8()?;
    let name = parser.read_prefixed_string_utf8()?;
    let flags = TypeAttributes::from_bits_retain(parser.read_le::<u32>()?);
    let extends = read_optional_token(parser)?;

    let mut interfaces = Vec::new();
    for _ in 0..parser.read_count()? {
        interfaces.push(parser.read_token()?);
    }

    let mut generic_params = Vec::new();
    for _ in 0..parser.read_count()? {
        generic_params.push(parser.read_prefixed_string_utf8()?);
    }

    let mut fields = Vec::new();
    for _ in 0..parser.read_count()? {
        fields.push(FieldDef {
            token: parser.read_token()?,
            name: parser.read_prefixed_string_utf8()?,
            flags: FieldAttributes::from_bits_retain(parser.read_le::<u32>()?),
            signature: TypeSig::decode(parser)?,
            attributes: read_attributes(parser)?,
        });
    }

    let mut methods = Vec::new();
    for _ in 0..parser.read_count()? {
        let token = parser.read_token()?;
        let name = parser.read_prefixed_string_utf8()?;
        let flags = MethodAttributes::from_bits_retain(parser.read_le::<u32>()?);
        let signature = MethodSig::decode(parser)?;
        let body = if parser.read_bool()? {
            Some(read_body(parser)?)
        } else {
            None
        };
        methods.push(MethodDef {
            token,
            name,
            flags,
            signature,
            body,
            attributes: read_attributes(parser)?,
        });
    }

    let mut properties = Vec::new();
    for _ in 0..parser.read_count()? {
        properties.push(PropertyDef {
            token: parser.read_token()?,
            name: parser.read_prefixed_string_utf8()?,
            signature: TypeSig::decode(parser)?,
            getter: read_optional_token(parser)?,
            setter: read_optional_token(parser)?,
            attributes: read_attributes(parser)?,
        });
    }

    let mut events = Vec::new();
    for _ in 0..parser.read_count()? {
        events.push(EventDef {
            token: parser.read_token()?,
            name: parser.read_prefixed_string_utf8()?,
            event_type: parser.read_token()?,
            add: read_optional_token(parser)?,
            remove: read_optional_token(parser)?,
            attributes: read_attributes(parser)?,
        });
    }

    let mut nested = Vec::new();
    for _ in 0..parser.read_count()? {
        nested.push(read_type(parser, depth + 1)?);
    }

    Ok(TypeDef {
        token,
        namespace,
        name,
        flags,
        extends,
        interfaces,
        generic_params,
        fields,
        methods,
        properties,
        events,
        nested,
        attributes: read_attributes(parser)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::{
        body::opcodes,
        builder::{MethodBuilder, ModuleBuilder, TypeBuilder},
    };

    fn sample_module() -> Module {
        let mut builder = ModuleBuilder::new("Sample", ModuleKind::Exe)
            .strong_name(Identity::PubKey(vec![0x00, 0x24, 0x00, 0x00]));
        let core = builder.reference(ModuleIdentity::new(
            "System.Runtime",
            ModuleVersion::new(8, 0, 0, 0),
        ));
        let object = builder.type_ref(core, "System", "Object");
        let console = builder.type_ref(core, "System", "Console");
        let write_line = builder.member_ref(
            console,
            "WriteLine",
            MemberSig::Method(MethodSig::new_static(TypeSig::Void, vec![TypeSig::String])),
        );

        let program = builder.add_type(
            TypeBuilder::new("Sample", "Program")
                .extends(object)
                .field("count", TypeSig::I4)
                .method(
                    MethodBuilder::new("Main", MethodSig::new_static(TypeSig::Void, vec![]))
                        .code(vec![
                            (opcodes::LDSTR, Operand::String("hello".into())),
                            (opcodes::CALL, Operand::Token(write_line)),
                            (opcodes::LDC_R8, Operand::F64(1.5)),
                            (opcodes::SWITCH, Operand::Switch(vec![0, 4])),
                            (opcodes::RET, Operand::None),
                        ]),
                )
                .nested(TypeBuilder::new("", "Inner").generic_param("T")),
        );
        let main = builder.method_token(program, "Main").unwrap();
        builder.entry_point(main);
        builder.resource("data.bin", vec![1, 2, 3]);
        builder.attribute(
            CustomAttribute::new(object, vec![AttributeValue::String(Some("x".into()))])
                .with_property("Flag", AttributeValue::Bool(true)),
        );

        let mut module = builder.build().unwrap();
        module.signature = Some(vec![0u8; 16]);
        module
    }

    #[test]
    fn test_round_trip() {
        let module = sample_module();
        let image = ImageCodec.write(&module).unwrap();

        assert_eq!(&image.bytes[..4], MAGIC);
        assert_eq!(
            &image.bytes[image.mvid_offset..image.mvid_offset + 16],
            &module.mvid.to_bytes()
        );
        let (offset, len) = image.signature_slot.unwrap();
        assert_eq!(offset + len, image.bytes.len());

        let decoded = ImageCodec.read(&image.bytes).unwrap();
        assert_eq!(decoded, module);
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = ImageCodec.write(&sample_module()).unwrap();
        let b = ImageCodec.write(&sample_module()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_damaged_images() {
        let image = ImageCodec.write(&sample_module()).unwrap().bytes;

        let mut bad_magic = image.clone();
        bad_magic[0] = b'X';
        assert!(ImageCodec.read(&bad_magic).is_err());

        assert!(ImageCodec.read(&image[..image.len() - 3]).is_err());

        let mut trailing = image.clone();
        trailing.push(0);
        assert!(ImageCodec.read(&trailing).is_err());
    }
}
