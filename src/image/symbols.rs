//! Debug symbol sidecar: per-method sequence points, bound to the image by MVID.

use std::collections::HashMap;

use crate::{
    file::{
        io::{push_le, push_prefixed_string_utf8},
        parser::Parser,
    },
    image::codec::push_count,
    metadata::{body::SequencePoint, module::Module, token::Token, typedef::TypeDef},
    Result,
};

const MAGIC: &[u8; 4] = b"DRPD";
const FORMAT_VERSION: u16 = 1;

pub(super) fn encode(module: &Module) -> Result<Vec<u8>> {
    let mut methods = Vec::new();
    module.walk_types(&mut |ty, _| {
        for method in &ty.methods {
            if let Some(body) = &method.body {
                if !body.sequence_points.is_empty() {
                    methods.push((method.token, &body.sequence_points));
                }
            }
        }
    });

    let mut buffer = Vec::new();
    buffer.extend_from_slice(MAGIC);
    push_le(&mut buffer, FORMAT_VERSION);
    buffer.extend_from_slice(&module.mvid.to_bytes());

    push_count(&mut buffer, methods.len())?;
    for (token, points) in methods {
        push_le(&mut buffer, token.value());
        push_count(&mut buffer, points.len())?;
        for point in points {
            push_le(&mut buffer, point.offset);
            push_prefixed_string_utf8(&mut buffer, &point.document);
            push_le(&mut buffer, point.start_line);
            push_le(&mut buffer, point.start_column);
            push_le(&mut buffer, point.end_line);
            push_le(&mut buffer, point.end_column);
        }
    }

    Ok(buffer)
}

pub(super) fn apply(module: &mut Module, data: &[u8]) -> Result<()> {
    let mut parser = Parser::new(data);
    if parser.read_bytes(4)? != MAGIC {
        return Err(malformed_error!("Not a symbol file - invalid magic"));
    }
    let version = parser.read_le::<u16>()?;
    if version != FORMAT_VERSION {
        return Err(malformed_error!("Unsupported symbol file version {}", version));
    }
    if parser.read_bytes(16)? != module.mvid.to_bytes() {
        return Err(malformed_error!(
            "Symbol file does not belong to module '{}'",
            module.name()
        ));
    }

    let mut points_by_method: HashMap<Token, Vec<SequencePoint>> = HashMap::new();
    for _ in 0..parser.read_count()? {
        let token = parser.read_token()?;
        let count = parser.read_count()?;
        let mut points = Vec::with_capacity(count);
        for _ in 0..count {
            points.push(SequencePoint {
                offset: parser.read_le::<u32>()?,
                document: parser.read_prefixed_string_utf8()?,
                start_line: parser.read_le::<u32>()?,
                start_column: parser.read_le::<u16>()?,
                end_line: parser.read_le::<u32>()?,
                end_column: parser.read_le::<u16>()?,
            });
        }
        points_by_method.insert(token, points);
    }

    fn attach(ty: &mut TypeDef, points: &mut HashMap<Token, Vec<SequencePoint>>) {
        for method in &mut ty.methods {
            if let (Some(body), Some(found)) = (&mut method.body, points.remove(&method.token)) {
                body.sequence_points = found;
            }
        }
        for nested in &mut ty.nested {
            attach(nested, points);
        }
    }

    for ty in &mut module.types {
        attach(ty, &mut points_by_method);
    }

    if let Some(token) = points_by_method.keys().min() {
        return Err(malformed_error!(
            "Symbol file references unknown method {}",
            token
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        image::{ImageCodec, ModuleReader, ModuleWriter},
        metadata::{
            body::{opcodes, Operand},
            builder::{MethodBuilder, ModuleBuilder, TypeBuilder},
            module::ModuleKind,
            signatures::{MethodSig, TypeSig},
        },
    };

    fn module_with_points() -> Module {
        let mut builder = ModuleBuilder::new("Lib", ModuleKind::Dll);
        builder.add_type(
            TypeBuilder::new("N", "T").method(
                MethodBuilder::new("F", MethodSig::new_static(TypeSig::Void, vec![]))
                    .code(vec![(opcodes::RET, Operand::None)]),
            ),
        );
        let mut module = builder.build().unwrap();
        if let Some(body) = module.types[0].methods[0].body.as_mut() {
            body.sequence_points.push(SequencePoint {
                offset: 0,
                document: "T.cs".into(),
                start_line: 3,
                start_column: 5,
                end_line: 3,
                end_column: 14,
            });
        }
        module
    }

    #[test]
    fn test_symbols_round_trip() {
        let module = module_with_points();
        let sidecar = ImageCodec.write_symbols(&module).unwrap();

        let mut stripped = module.clone();
        stripped.types[0].methods[0]
            .body
            .as_mut()
            .unwrap()
            .sequence_points
            .clear();

        ImageCodec.read_symbols(&mut stripped, &sidecar).unwrap();
        assert_eq!(stripped, module);
    }

    #[test]
    fn test_symbols_bound_to_mvid() {
        let module = module_with_points();
        let sidecar = ImageCodec.write_symbols(&module).unwrap();

        let mut other = module.clone();
        other.mvid = uguid::Guid::ZERO;
        assert!(ImageCodec.read_symbols(&mut other, &sidecar).is_err());
    }
}
