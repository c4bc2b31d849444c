use crate::{reader::AseReader, user_data::UserData, writer::AseWriter, AsepriteError, Result};
use log::debug;
use std::{convert::TryFrom, io::Write};

/// A tag is a grouping of one or more frames.
#[derive(Debug, Clone, PartialEq)]
pub struct Tag {
    /// Name of the tag. Might not be unique.
    pub name: String,
    /// First frame included in the tag.
    pub from_frame: u32,
    /// Last frame included in the tag (inclusive).
    pub to_frame: u32,
    /// Animation direction.
    pub direction: AnimationDirection,
    /// How often the animation is played. 0 means forever.
    pub repeat: u16,
    /// Legacy tag color. Newer files prefer the user data color.
    pub color: [u8; 3],
    #[allow(missing_docs)]
    pub user_data: UserData,
}

impl Tag {
    /// Create a forward tag spanning `from_frame..=to_frame`.
    pub fn new(name: &str, from_frame: u32, to_frame: u32) -> Self {
        Self {
            name: name.to_owned(),
            from_frame,
            to_frame,
            direction: AnimationDirection::Forward,
            repeat: 0,
            color: [0, 0, 0],
            user_data: UserData::default(),
        }
    }
}

/// Describes how the tag's frames should be animated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnimationDirection {
    /// Start at `from_frame` and count up to `to_frame`.
    Forward,
    /// Start at `to_frame` and count down to `from_frame`.
    Reverse,
    /// Start at `from_frame`, count up to `to_frame`, then back down to
    /// `from_frame`.
    PingPong,
    /// Start at `to_frame`, count down to `from_frame`, then back up to
    /// `to_frame`.
    PingPongReverse,
}

impl AnimationDirection {
    fn from_u8(id: u8) -> Self {
        match id {
            0 => AnimationDirection::Forward,
            1 => AnimationDirection::Reverse,
            2 => AnimationDirection::PingPong,
            3 => AnimationDirection::PingPongReverse,
            _ => {
                debug!("Unknown animation direction {}, using forward", id);
                AnimationDirection::Forward
            }
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            AnimationDirection::Forward => 0,
            AnimationDirection::Reverse => 1,
            AnimationDirection::PingPong => 2,
            AnimationDirection::PingPongReverse => 3,
        }
    }
}

pub(crate) fn parse_chunk(data: &[u8]) -> Result<Vec<Tag>> {
    let mut reader = AseReader::new(data);

    let num_tags = reader.word()?;
    reader.skip_reserved(8)?;

    let mut result = Vec::with_capacity(num_tags as usize);

    for _tag in 0..num_tags {
        let from_frame = reader.word()?;
        let to_frame = reader.word()?;
        let direction = AnimationDirection::from_u8(reader.byte()?);
        let repeat = reader.word()?;
        reader.skip_reserved(6)?;
        let red = reader.byte()?;
        let green = reader.byte()?;
        let blue = reader.byte()?;
        let _extra = reader.byte()?;
        let name = reader.string()?;
        result.push(Tag {
            name,
            from_frame: from_frame as u32,
            to_frame: to_frame as u32,
            direction,
            repeat,
            color: [red, green, blue],
            user_data: UserData::default(),
        });
    }

    Ok(result)
}

fn frame_u16(frame: u32) -> Result<u16> {
    u16::try_from(frame)
        .map_err(|_| AsepriteError::InvalidInput(format!("Tag frame {} out of range", frame)))
}

pub(crate) fn write_chunk<'a, W, I>(writer: &mut AseWriter<W>, tags: I) -> Result<()>
where
    W: Write,
    I: ExactSizeIterator<Item = &'a Tag>,
{
    let count = u16::try_from(tags.len())
        .map_err(|_| AsepriteError::InvalidInput("Too many tags".into()))?;
    writer.word(count)?;
    writer.padding(8)?;
    for tag in tags {
        writer.word(frame_u16(tag.from_frame)?)?;
        writer.word(frame_u16(tag.to_frame)?)?;
        writer.byte(tag.direction.to_u8())?;
        writer.word(tag.repeat)?;
        writer.padding(6)?;
        writer.bytes(&tag.color)?;
        writer.byte(0)?;
        writer.string(&tag.name)?;
    }
    Ok(())
}
