//! The texture slots a material can carry and the policy bits attached to each.

/// How a texture bound to a slot must be treated when it is converted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct SlotPolicy {
    /// Colour data is stored in sRGB; everything else is linear.
    pub is_color_data: bool,
    /// Tangent-space normals that get renormalised after every resample.
    pub is_normal_map: bool,
    /// Packed metallic (blue) and roughness (green) channels.
    pub is_split_channel: bool,
}

impl SlotPolicy {
    const LINEAR: SlotPolicy = SlotPolicy {
        is_color_data: false,
        is_normal_map: false,
        is_split_channel: false,
    };
    const COLOR: SlotPolicy = SlotPolicy {
        is_color_data: true,
        ..SlotPolicy::LINEAR
    };
    const NORMAL: SlotPolicy = SlotPolicy {
        is_normal_map: true,
        ..SlotPolicy::LINEAR
    };
    const SPLIT: SlotPolicy = SlotPolicy {
        is_split_channel: true,
        ..SlotPolicy::LINEAR
    };
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SlotKind {
    BaseColor,
    MetallicRoughness,
    Emissive,
    Normal,
    Occlusion,
    SpecularColor,
    Specular,
    Clearcoat,
    ClearcoatRoughness,
    ClearcoatNormal,
    SheenColor,
    SheenRoughness,
    Transmission,
    Diffuse,
    SpecularGlossiness,
    Thickness,
    Iridescence,
    IridescenceThickness,
    Anisotropy,
}

impl SlotKind {
    /// Visiting order for every slot walk. Conversion policy for a texture
    /// bound to several slots is taken from the first one in this order.
    pub const ALL: [SlotKind; 19] = [
        SlotKind::BaseColor,
        SlotKind::MetallicRoughness,
        SlotKind::Emissive,
        SlotKind::Normal,
        SlotKind::Occlusion,
        SlotKind::SpecularColor,
        SlotKind::Specular,
        SlotKind::Clearcoat,
        SlotKind::ClearcoatRoughness,
        SlotKind::ClearcoatNormal,
        SlotKind::SheenColor,
        SlotKind::SheenRoughness,
        SlotKind::Transmission,
        SlotKind::Diffuse,
        SlotKind::SpecularGlossiness,
        SlotKind::Thickness,
        SlotKind::Iridescence,
        SlotKind::IridescenceThickness,
        SlotKind::Anisotropy,
    ];

    /// JSON object path from the material root to the slot's texture info.
    pub fn path(self) -> &'static [&'static str] {
        match self {
            SlotKind::BaseColor => &["pbrMetallicRoughness", "baseColorTexture"],
            SlotKind::MetallicRoughness => &["pbrMetallicRoughness", "metallicRoughnessTexture"],
            SlotKind::Emissive => &["emissiveTexture"],
            SlotKind::Normal => &["normalTexture"],
            SlotKind::Occlusion => &["occlusionTexture"],
            SlotKind::SpecularColor => &["extensions", "KHR_materials_specular", "specularColorTexture"],
            SlotKind::Specular => &["extensions", "KHR_materials_specular", "specularTexture"],
            SlotKind::Clearcoat => &["extensions", "KHR_materials_clearcoat", "clearcoatTexture"],
            SlotKind::ClearcoatRoughness => &[
                "extensions",
                "KHR_materials_clearcoat",
                "clearcoatRoughnessTexture",
            ],
            SlotKind::ClearcoatNormal => &["extensions", "KHR_materials_clearcoat", "clearcoatNormalTexture"],
            SlotKind::SheenColor => &["extensions", "KHR_materials_sheen", "sheenColorTexture"],
            SlotKind::SheenRoughness => &["extensions", "KHR_materials_sheen", "sheenRoughnessTexture"],
            SlotKind::Transmission => &["extensions", "KHR_materials_transmission", "transmissionTexture"],
            SlotKind::Diffuse => &["extensions", "KHR_materials_pbrSpecularGlossiness", "diffuseTexture"],
            SlotKind::SpecularGlossiness => &[
                "extensions",
                "KHR_materials_pbrSpecularGlossiness",
                "specularGlossinessTexture",
            ],
            SlotKind::Thickness => &["extensions", "KHR_materials_volume", "thicknessTexture"],
            SlotKind::Iridescence => &["extensions", "KHR_materials_iridescence", "iridescenceTexture"],
            SlotKind::IridescenceThickness => &[
                "extensions",
                "KHR_materials_iridescence",
                "iridescenceThicknessTexture",
            ],
            SlotKind::Anisotropy => &["extensions", "KHR_materials_anisotropy", "anisotropyTexture"],
        }
    }

    pub fn policy(self) -> SlotPolicy {
        match self {
            SlotKind::BaseColor
            | SlotKind::Emissive
            | SlotKind::SpecularColor
            | SlotKind::SheenColor
            | SlotKind::Diffuse
            | SlotKind::SpecularGlossiness => SlotPolicy::COLOR,
            SlotKind::Normal | SlotKind::ClearcoatNormal => SlotPolicy::NORMAL,
            SlotKind::MetallicRoughness => SlotPolicy::SPLIT,
            _ => SlotPolicy::LINEAR,
        }
    }
}
