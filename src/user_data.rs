use crate::{reader::AseReader, writer::AseWriter, AsepriteError, Result};
use bitflags::bitflags;
use log::warn;
use std::{
    collections::BTreeMap,
    convert::TryFrom,
    io::{Read, Write},
};

bitflags! {
    struct UserDataFlags: u32 {
        const HAS_TEXT = 0x0001;
        const HAS_COLOR = 0x0002;
        const HAS_PROPERTIES = 0x0004;
    }
}

const PROPERTY_BOOL: u16 = 0x0001;
const PROPERTY_INT8: u16 = 0x0002;
const PROPERTY_UINT8: u16 = 0x0003;
const PROPERTY_INT16: u16 = 0x0004;
const PROPERTY_UINT16: u16 = 0x0005;
const PROPERTY_INT32: u16 = 0x0006;
const PROPERTY_UINT32: u16 = 0x0007;
const PROPERTY_INT64: u16 = 0x0008;
const PROPERTY_UINT64: u16 = 0x0009;
const PROPERTY_FIXED: u16 = 0x000A;
const PROPERTY_FLOAT: u16 = 0x000B;
const PROPERTY_DOUBLE: u16 = 0x000C;
const PROPERTY_STRING: u16 = 0x000D;
const PROPERTY_POINT: u16 = 0x000E;
const PROPERTY_SIZE: u16 = 0x000F;
const PROPERTY_RECT: u16 = 0x0010;
const PROPERTY_VECTOR: u16 = 0x0011;
const PROPERTY_MAP: u16 = 0x0012;
const PROPERTY_UUID: u16 = 0x0013;

// Vectors whose elements carry their own type.
const MIXED_VECTOR: u16 = 0;

const MAX_NESTING: usize = 32;

/// Named properties of one properties map.
pub type PropertyMap = BTreeMap<String, Property>;

/// A typed property value. Values keep the type they were stored with.
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq)]
pub enum Property {
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    /// 16.16 fixed point value in its raw form.
    Fixed(i32),
    F32(f32),
    F64(f64),
    String(String),
    Point { x: i32, y: i32 },
    Size { width: i32, height: i32 },
    Rect { x: i32, y: i32, width: i32, height: i32 },
    Vector(Vec<Property>),
    Map(PropertyMap),
    Uuid([u8; 16]),
}

impl Property {
    fn type_id(&self) -> u16 {
        match self {
            Property::Bool(_) => PROPERTY_BOOL,
            Property::I8(_) => PROPERTY_INT8,
            Property::U8(_) => PROPERTY_UINT8,
            Property::I16(_) => PROPERTY_INT16,
            Property::U16(_) => PROPERTY_UINT16,
            Property::I32(_) => PROPERTY_INT32,
            Property::U32(_) => PROPERTY_UINT32,
            Property::I64(_) => PROPERTY_INT64,
            Property::U64(_) => PROPERTY_UINT64,
            Property::Fixed(_) => PROPERTY_FIXED,
            Property::F32(_) => PROPERTY_FLOAT,
            Property::F64(_) => PROPERTY_DOUBLE,
            Property::String(_) => PROPERTY_STRING,
            Property::Point { .. } => PROPERTY_POINT,
            Property::Size { .. } => PROPERTY_SIZE,
            Property::Rect { .. } => PROPERTY_RECT,
            Property::Vector(_) => PROPERTY_VECTOR,
            Property::Map(_) => PROPERTY_MAP,
            Property::Uuid(_) => PROPERTY_UUID,
        }
    }
}

/// UserData contains user-provided metadata which describes some other data in the sprite.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserData {
    /// User-provided string data.
    pub text: Option<String>,
    /// User-provided color in bytes [red, green, blue, alpha].
    pub color: Option<[u8; 4]>,
    /// Properties maps by key. Key 0 holds the user's own properties, other
    /// keys are ids of extension entries in the document's external files.
    pub properties: BTreeMap<u32, PropertyMap>,
}

impl UserData {
    /// Returns `true` if neither text, color nor properties are set.
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.color.is_none() && self.properties.is_empty()
    }
}

pub(crate) fn parse_chunk(data: &[u8]) -> Result<UserData> {
    let mut reader = AseReader::new(data);

    let flags = UserDataFlags::from_bits_truncate(reader.dword()?);
    let text = if flags.contains(UserDataFlags::HAS_TEXT) {
        Some(reader.string()?)
    } else {
        None
    };
    let color = if flags.contains(UserDataFlags::HAS_COLOR) {
        let red = reader.byte()?;
        let green = reader.byte()?;
        let blue = reader.byte()?;
        let alpha = reader.byte()?;
        Some([red, green, blue, alpha])
    } else {
        None
    };
    let properties = if flags.contains(UserDataFlags::HAS_PROPERTIES) {
        // Text and color stay usable if the properties are damaged.
        parse_properties(&mut reader).unwrap_or_else(|err| {
            warn!("Ignoring user data properties: {}", err);
            BTreeMap::new()
        })
    } else {
        BTreeMap::new()
    };

    Ok(UserData {
        text,
        color,
        properties,
    })
}

fn parse_properties<R: Read>(reader: &mut AseReader<R>) -> Result<BTreeMap<u32, PropertyMap>> {
    let size = reader.dword()?;
    if size < 8 {
        return Err(AsepriteError::InvalidInput(format!(
            "Invalid size of user data properties: {}",
            size
        )));
    }
    let count = reader.dword()?;
    let mut maps = BTreeMap::new();
    for _ in 0..count {
        let key = reader.dword()?;
        let map = parse_property_map(reader, 0)?;
        maps.insert(key, map);
    }
    Ok(maps)
}

fn parse_property_map<R: Read>(reader: &mut AseReader<R>, depth: usize) -> Result<PropertyMap> {
    let count = reader.dword()?;
    let mut map = PropertyMap::new();
    for _ in 0..count {
        let name = reader.string()?;
        let type_id = reader.word()?;
        let value = parse_property(reader, type_id, depth)?;
        // Later duplicates win.
        map.insert(name, value);
    }
    Ok(map)
}

fn parse_property<R: Read>(reader: &mut AseReader<R>, type_id: u16, depth: usize) -> Result<Property> {
    if depth > MAX_NESTING {
        return Err(AsepriteError::InvalidInput(
            "User data properties are nested too deeply".into(),
        ));
    }
    let value = match type_id {
        PROPERTY_BOOL => Property::Bool(reader.byte()? != 0),
        PROPERTY_INT8 => Property::I8(reader.byte()? as i8),
        PROPERTY_UINT8 => Property::U8(reader.byte()?),
        PROPERTY_INT16 => Property::I16(reader.short()?),
        PROPERTY_UINT16 => Property::U16(reader.word()?),
        PROPERTY_INT32 => Property::I32(reader.long()?),
        PROPERTY_UINT32 => Property::U32(reader.dword()?),
        PROPERTY_INT64 => Property::I64(reader.qword()? as i64),
        PROPERTY_UINT64 => Property::U64(reader.qword()?),
        PROPERTY_FIXED => Property::Fixed(reader.long()?),
        PROPERTY_FLOAT => Property::F32(f32::from_bits(reader.dword()?)),
        PROPERTY_DOUBLE => Property::F64(f64::from_bits(reader.qword()?)),
        PROPERTY_STRING => Property::String(reader.string()?),
        PROPERTY_POINT => Property::Point {
            x: reader.long()?,
            y: reader.long()?,
        },
        PROPERTY_SIZE => Property::Size {
            width: reader.long()?,
            height: reader.long()?,
        },
        PROPERTY_RECT => Property::Rect {
            x: reader.long()?,
            y: reader.long()?,
            width: reader.long()?,
            height: reader.long()?,
        },
        PROPERTY_VECTOR => {
            let count = reader.dword()?;
            let element_type = reader.word()?;
            let mut items = Vec::with_capacity(count.min(1024) as usize);
            for _ in 0..count {
                let item_type = if element_type == MIXED_VECTOR {
                    reader.word()?
                } else {
                    element_type
                };
                items.push(parse_property(reader, item_type, depth + 1)?);
            }
            Property::Vector(items)
        }
        PROPERTY_MAP => Property::Map(parse_property_map(reader, depth + 1)?),
        PROPERTY_UUID => {
            let mut uuid = [0_u8; 16];
            reader.read_exact(&mut uuid)?;
            Property::Uuid(uuid)
        }
        _ => {
            return Err(AsepriteError::UnsupportedFeature(format!(
                "Unknown user data property type: {}",
                type_id
            )))
        }
    };
    Ok(value)
}

pub(crate) fn write_chunk<W: Write>(writer: &mut AseWriter<W>, user_data: &UserData) -> Result<()> {
    let mut flags = UserDataFlags::empty();
    if user_data.text.is_some() {
        flags |= UserDataFlags::HAS_TEXT;
    }
    if user_data.color.is_some() {
        flags |= UserDataFlags::HAS_COLOR;
    }
    if !user_data.properties.is_empty() {
        flags |= UserDataFlags::HAS_PROPERTIES;
    }
    writer.dword(flags.bits())?;
    if let Some(text) = &user_data.text {
        writer.string(text)?;
    }
    if let Some(color) = &user_data.color {
        writer.bytes(color)?;
    }
    if !user_data.properties.is_empty() {
        let mut maps = AseWriter::buffer();
        maps.dword(count(user_data.properties.len())?)?;
        for (key, map) in &user_data.properties {
            maps.dword(*key)?;
            write_property_map(&mut maps, map)?;
        }
        let maps = maps.into_inner();
        // The size covers the size field itself.
        writer.dword(count(maps.len() + 4)?)?;
        writer.bytes(&maps)?;
    }
    Ok(())
}

fn count(len: usize) -> Result<u32> {
    u32::try_from(len)
        .map_err(|_| AsepriteError::InvalidInput(format!("Too many user data properties: {}", len)))
}

fn write_property_map<W: Write>(writer: &mut AseWriter<W>, map: &PropertyMap) -> Result<()> {
    writer.dword(count(map.len())?)?;
    for (name, value) in map {
        writer.string(name)?;
        writer.word(value.type_id())?;
        write_property(writer, value)?;
    }
    Ok(())
}

fn write_property<W: Write>(writer: &mut AseWriter<W>, value: &Property) -> Result<()> {
    match value {
        Property::Bool(v) => writer.byte(*v as u8),
        Property::I8(v) => writer.byte(*v as u8),
        Property::U8(v) => writer.byte(*v),
        Property::I16(v) => writer.short(*v),
        Property::U16(v) => writer.word(*v),
        Property::I32(v) => writer.long(*v),
        Property::U32(v) => writer.dword(*v),
        Property::I64(v) => writer.qword(*v as u64),
        Property::U64(v) => writer.qword(*v),
        Property::Fixed(v) => writer.long(*v),
        Property::F32(v) => writer.dword(v.to_bits()),
        Property::F64(v) => writer.qword(v.to_bits()),
        Property::String(v) => writer.string(v),
        Property::Point { x, y } => {
            writer.long(*x)?;
            writer.long(*y)
        }
        Property::Size { width, height } => {
            writer.long(*width)?;
            writer.long(*height)
        }
        Property::Rect {
            x,
            y,
            width,
            height,
        } => {
            writer.long(*x)?;
            writer.long(*y)?;
            writer.long(*width)?;
            writer.long(*height)
        }
        Property::Vector(items) => {
            writer.dword(count(items.len())?)?;
            let element_type = match items.split_first() {
                Some((first, rest)) if rest.iter().all(|i| i.type_id() == first.type_id()) => {
                    first.type_id()
                }
                _ => MIXED_VECTOR,
            };
            writer.word(element_type)?;
            for item in items {
                if element_type == MIXED_VECTOR {
                    writer.word(item.type_id())?;
                }
                write_property(writer, item)?;
            }
            Ok(())
        }
        Property::Map(map) => write_property_map(writer, map),
        Property::Uuid(v) => writer.bytes(v),
    }
}
