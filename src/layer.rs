use crate::{
    cel::{Cel, CelData}, header::HeaderFlags, reader::AseReader, user_data::UserData, writer::AseWriter,
    AsepriteError, Result,
};
use bitflags::bitflags;
use std::{collections::BTreeMap, io::Write, ops::Index, sync::Arc};

/// Types of layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    /// A regular image layer. This is the normal layer type.
    Image,
    /// A layer that groups other layers and does not contain any image data.
    /// In Aseprite these are represented by a folder icon.
    Group,
    /// A layer whose cels are tilemaps into the tileset with the given index.
    Tilemap {
        #[allow(missing_docs)]
        tileset: u32,
    },
}

bitflags! {
    /// Persisted layer flags.
    pub struct LayerFlags: u32 {
        /// Layer is visible (eye icon is enabled).
        const VISIBLE = 0x0001;
        /// Layer can be modified (lock icon is disabled).
        const EDITABLE = 0x0002;
        /// Layer cannot be moved.
        const MOVEMENT_LOCKED = 0x0004;
        /// Layer is background (stack order cannot be changed).
        const BACKGROUND = 0x0008;
        /// Prefer to link cels when the user copies them.
        const CONTINUOUS = 0x0010;
        /// Prefer to show this group layer collapsed.
        const COLLAPSED = 0x0020;
        /// This is a reference layer.
        const REFERENCE = 0x0040;
    }
}

impl LayerFlags {
    /// Shortcut for `.contains(LayerFlags::VISIBLE)`.
    pub fn is_visible(&self) -> bool {
        self.contains(LayerFlags::VISIBLE)
    }
}

/// Describes how a layer is combined with the layers underneath it.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlendMode {
    Normal,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Hue,
    Saturation,
    Color,
    Luminosity,
    Addition,
    Subtract,
    Divide,
}

const BLEND_MODES: [BlendMode; 19] = [
    BlendMode::Normal,
    BlendMode::Multiply,
    BlendMode::Screen,
    BlendMode::Overlay,
    BlendMode::Darken,
    BlendMode::Lighten,
    BlendMode::ColorDodge,
    BlendMode::ColorBurn,
    BlendMode::HardLight,
    BlendMode::SoftLight,
    BlendMode::Difference,
    BlendMode::Exclusion,
    BlendMode::Hue,
    BlendMode::Saturation,
    BlendMode::Color,
    BlendMode::Luminosity,
    BlendMode::Addition,
    BlendMode::Subtract,
    BlendMode::Divide,
];

impl BlendMode {
    fn from_u16(id: u16) -> Option<Self> {
        BLEND_MODES.get(id as usize).copied()
    }

    fn to_u16(self) -> u16 {
        self as u16
    }
}

/// Index of a layer in a [LayerTree].
///
/// Ids are handed out in the order layers are added. A decoded document adds
/// its layers in file order, so ids of a decoded copy may differ from the ids
/// of the document that was encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayerId(pub(crate) u32);

impl LayerId {
    /// Position of the layer in insertion order.
    pub fn index(&self) -> u32 {
        self.0
    }
}

/// A single layer and its cels.
///
/// Two layers are equal if their content and cels are equal. Their position
/// in a tree is not compared.
#[derive(Debug, Clone)]
pub struct Layer {
    #[allow(missing_docs)]
    pub kind: LayerKind,
    /// Name of the layer.
    pub name: String,
    #[allow(missing_docs)]
    pub flags: LayerFlags,
    /// Blend mode of the layer. See [BlendMode] for details.
    pub blend_mode: BlendMode,
    /// Layer opacity. Ignored for background layers.
    pub opacity: u8,
    /// Stable identifier of the layer, if the file carries one.
    pub uuid: Option<[u8; 16]>,
    #[allow(missing_docs)]
    pub user_data: UserData,
    parent: Option<LayerId>,
    children: Vec<LayerId>,
    cels: BTreeMap<u32, Cel>,
}

impl Layer {
    /// A visible, editable layer with normal blending and full opacity.
    pub fn new(kind: LayerKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_owned(),
            flags: LayerFlags::VISIBLE | LayerFlags::EDITABLE,
            blend_mode: BlendMode::Normal,
            opacity: 255,
            uuid: None,
            user_data: UserData::default(),
            parent: None,
            children: Vec::new(),
            cels: BTreeMap::new(),
        }
    }

    /// The group containing this layer. `None` for top-level layers.
    pub fn parent(&self) -> Option<LayerId> {
        self.parent
    }

    /// Child layers of a group, bottom to top.
    pub fn children(&self) -> &[LayerId] {
        &self.children
    }

    /// All cels of this layer by frame.
    pub fn cels(&self) -> &BTreeMap<u32, Cel> {
        &self.cels
    }

    /// The cel at `frame`, if the layer has content there.
    pub fn cel(&self, frame: u32) -> Option<&Cel> {
        self.cels.get(&frame)
    }

    #[allow(missing_docs)]
    pub fn cel_mut(&mut self, frame: u32) -> Option<&mut Cel> {
        self.cels.get_mut(&frame)
    }

    pub(crate) fn insert_cel(&mut self, frame: u32, cel: Cel) {
        self.cels.insert(frame, cel);
    }

    pub(crate) fn retain_cels<F: FnMut(u32) -> bool>(&mut self, mut keep: F) {
        self.cels.retain(|frame, _| keep(*frame));
    }

    // Sets the user data of the cel at `frame` and of every cel linked to it.
    pub(crate) fn set_cel_user_data(&mut self, frame: u32, user_data: UserData) -> Option<()> {
        let cel = self.cels.get_mut(&frame)?;
        if let Some(data) = Arc::get_mut(&mut cel.data) {
            data.user_data = user_data;
            return Some(());
        }
        let shared = cel.data_ref().clone();
        let data = Arc::new(CelData {
            image: shared.image.clone(),
            user_data,
        });
        for cel in self.cels.values_mut() {
            if Arc::ptr_eq(cel.data_ref(), &shared) {
                cel.data = data.clone();
            }
        }
        Some(())
    }

    /// Shortcut for `kind == LayerKind::Group`.
    pub fn is_group(&self) -> bool {
        self.kind == LayerKind::Group
    }
}

impl PartialEq for Layer {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.name == other.name
            && self.flags == other.flags
            && self.blend_mode == other.blend_mode
            && self.opacity == other.opacity
            && self.uuid == other.uuid
            && self.user_data == other.user_data
            && self.cels == other.cels
    }
}

/// The layer hierarchy of a document.
///
/// Layers are stored in insertion order. Use [LayerTree::pre_order] for file
/// order, where groups come before their children and siblings are ordered
/// bottom to top. Two trees are equal if their pre-order walks visit equal
/// layers at equal nesting levels.
#[derive(Debug, Clone, Default)]
pub struct LayerTree {
    layers: Vec<Layer>,
    roots: Vec<LayerId>,
}

impl Index<LayerId> for LayerTree {
    type Output = Layer;

    fn index(&self, id: LayerId) -> &Self::Output {
        &self.layers[id.0 as usize]
    }
}

impl PartialEq for LayerTree {
    fn eq(&self, other: &Self) -> bool {
        let (ours, theirs) = (self.pre_order(), other.pre_order());
        ours.len() == theirs.len()
            && ours
                .iter()
                .zip(&theirs)
                .all(|((a, a_level), (b, b_level))| a_level == b_level && self[*a] == other[*b])
    }
}

impl LayerTree {
    /// Append `layer` as the topmost child of `parent` (or as a top-level
    /// layer). The parent must be a group.
    pub fn add(&mut self, parent: Option<LayerId>, mut layer: Layer) -> Result<LayerId> {
        let id = LayerId(self.layers.len() as u32);
        match parent {
            Some(parent_id) => {
                let parent_layer = self.layers.get_mut(parent_id.0 as usize).ok_or_else(|| {
                    AsepriteError::InvalidInput(format!("Unknown parent layer {}", parent_id.0))
                })?;
                if !parent_layer.is_group() {
                    return Err(AsepriteError::InvalidInput(format!(
                        "Parent layer {} is not a group",
                        parent_id.0
                    )));
                }
                parent_layer.children.push(id);
            }
            None => self.roots.push(id),
        }
        layer.parent = parent;
        layer.children.clear();
        self.layers.push(layer);
        Ok(id)
    }

    #[allow(missing_docs)]
    pub fn get(&self, id: LayerId) -> Option<&Layer> {
        self.layers.get(id.0 as usize)
    }

    #[allow(missing_docs)]
    pub fn get_mut(&mut self, id: LayerId) -> Option<&mut Layer> {
        self.layers.get_mut(id.0 as usize)
    }

    /// Look up a layer by its position in insertion order.
    pub fn by_index(&self, index: u32) -> Option<LayerId> {
        if (index as usize) < self.layers.len() {
            Some(LayerId(index))
        } else {
            None
        }
    }

    /// Number of layers, including groups.
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    #[allow(missing_docs)]
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Top-level layers, bottom to top.
    pub fn roots(&self) -> &[LayerId] {
        &self.roots
    }

    /// All layers in pre-order with their nesting level (0 = top-level).
    /// This is the order in which layers are stored in a file.
    pub fn pre_order(&self) -> Vec<(LayerId, u16)> {
        let mut result = Vec::with_capacity(self.layers.len());
        let mut stack: Vec<(LayerId, u16)> =
            self.roots.iter().rev().map(|id| (*id, 0)).collect();
        while let Some((id, level)) = stack.pop() {
            result.push((id, level));
            for child in self[id].children.iter().rev() {
                stack.push((*child, level + 1));
            }
        }
        result
    }

    /// All layers with their ids.
    pub fn iter(&self) -> impl Iterator<Item = (LayerId, &Layer)> {
        self.layers
            .iter()
            .enumerate()
            .map(|(i, layer)| (LayerId(i as u32), layer))
    }
}

/// A layer chunk together with its nesting level.
pub(crate) struct ParsedLayer {
    pub layer: Layer,
    pub level: u16,
}

pub(crate) fn parse_chunk(data: &[u8], header_flags: HeaderFlags) -> Result<ParsedLayer> {
    let mut reader = AseReader::new(data);

    let flags = reader.word()?;
    let layer_type = reader.word()?;
    let level = reader.word()?;
    let _default_width = reader.word()?;
    let _default_height = reader.word()?;
    let blend_mode = reader.word()?;
    let opacity = reader.byte()?;
    reader.skip_reserved(3)?;
    let name = reader.string()?;

    let kind = match layer_type {
        0 => LayerKind::Image,
        1 => LayerKind::Group,
        2 => LayerKind::Tilemap {
            tileset: reader.dword()?,
        },
        _ => {
            return Err(AsepriteError::UnsupportedFeature(format!(
                "Invalid layer type: {}",
                layer_type
            )))
        }
    };
    let uuid = if header_flags.contains(HeaderFlags::LAYER_UUID) {
        let mut uuid = [0_u8; 16];
        reader.read_exact(&mut uuid)?;
        Some(uuid)
    } else {
        None
    };

    let mut layer = Layer::new(kind, &name);
    layer.flags = LayerFlags::from_bits_truncate(flags as u32);
    layer.blend_mode = BlendMode::from_u16(blend_mode).unwrap_or(BlendMode::Normal);
    layer.opacity = opacity;
    layer.uuid = uuid;

    if !header_flags.contains(HeaderFlags::LAYER_OPACITY) {
        layer.opacity = 255;
    }
    if layer.is_group() && !header_flags.contains(HeaderFlags::GROUP_BLEND) {
        layer.opacity = 255;
        layer.blend_mode = BlendMode::Normal;
    }

    Ok(ParsedLayer { layer, level })
}

pub(crate) fn write_chunk<W: Write>(
    writer: &mut AseWriter<W>,
    layer: &Layer,
    level: u16,
    with_uuid: bool,
) -> Result<()> {
    let layer_type = match layer.kind {
        LayerKind::Image => 0,
        LayerKind::Group => 1,
        LayerKind::Tilemap { .. } => 2,
    };
    writer.word(layer.flags.bits() as u16)?;
    writer.word(layer_type)?;
    writer.word(level)?;
    writer.word(0)?;
    writer.word(0)?;
    writer.word(layer.blend_mode.to_u16())?;
    writer.byte(layer.opacity)?;
    writer.padding(3)?;
    writer.string(&layer.name)?;
    if let LayerKind::Tilemap { tileset } = layer.kind {
        writer.dword(tileset)?;
    }
    if with_uuid {
        writer.bytes(&layer.uuid.unwrap_or([0; 16]))?;
    }
    Ok(())
}
