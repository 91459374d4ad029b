//! HDR signalling through `wp_color_manager_v1`.
//!
//! The color manager is optional. When it is present, the compositor
//! announces what it supports once after bind; [`ColorManager::set_hdr`]
//! then checks a picture's colorimetry against those sets and, if every
//! piece is supported, builds a parametric image description and puts it
//! on the main surface as soon as the compositor reports it ready.
//! Anything unsupported fails closed: the surface goes back to the
//! compositor's default (SDR) description.

use std::sync::Arc;

use bitflags::bitflags;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::connection::{Connection, WeakConnection};
use crate::registry::{Registry, RegistryError};
use crate::wire::{listener, Chromaticity, Create, Event, Interface, ObjectId, Request, WireError};

bitflags! {
    /// `wp_color_manager_v1.render_intent`, one bit per enum value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RenderIntents: u32 {
        const PERCEPTUAL = 1 << 0;
        const RELATIVE = 1 << 1;
        const SATURATION = 1 << 2;
        const ABSOLUTE = 1 << 3;
        const RELATIVE_BPC = 1 << 4;
    }

    /// `wp_color_manager_v1.feature`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColorFeatures: u32 {
        const ICC_V2_V4 = 1 << 0;
        const PARAMETRIC = 1 << 1;
        const SET_PRIMARIES = 1 << 2;
        const SET_TF_POWER = 1 << 3;
        const SET_LUMINANCES = 1 << 4;
        const SET_MASTERING_DISPLAY_PRIMARIES = 1 << 5;
        const EXTENDED_TARGET_VOLUME = 1 << 6;
        const WINDOWS_SCRGB = 1 << 7;
    }

    /// `wp_color_manager_v1.transfer_function`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct TransferFunctions: u32 {
        const BT1886 = 1 << 1;
        const GAMMA22 = 1 << 2;
        const GAMMA28 = 1 << 3;
        const ST240 = 1 << 4;
        const EXT_LINEAR = 1 << 5;
        const LOG_100 = 1 << 6;
        const LOG_316 = 1 << 7;
        const XVYCC = 1 << 8;
        const SRGB = 1 << 9;
        const EXT_SRGB = 1 << 10;
        const ST2084_PQ = 1 << 11;
        const ST428 = 1 << 12;
        const HLG = 1 << 13;
    }

    /// `wp_color_manager_v1.primaries`
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct NamedPrimaries: u32 {
        const SRGB = 1 << 1;
        const PAL_M = 1 << 2;
        const PAL = 1 << 3;
        const NTSC = 1 << 4;
        const GENERIC_FILM = 1 << 5;
        const BT2020 = 1 << 6;
        const CIE1931_XYZ = 1 << 7;
        const DCI_P3 = 1 << 8;
        const DISPLAY_P3 = 1 << 9;
        const ADOBE_RGB = 1 << 10;
    }
}

/// Bit for wire enum value `value`; values beyond 31 cannot be represented.
fn bit(value: u32) -> u32 {
    1u32.checked_shl(value).unwrap_or(0)
}

/// Wire enum value of a single-bit flag.
fn wire_value(flag: u32) -> u32 {
    flag.trailing_zeros()
}

/// Transfer characteristics of decoded video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorTransfer {
    #[default]
    Unspecified,
    Bt709,
    Bt470M,
    Bt470Bg,
    Smpte170M,
    Smpte240M,
    Linear,
    Iec61966_2_1,
    Bt2020_10,
    Bt2020_12,
    Smpte2084,
    Smpte428,
    AribStdB67,
}

impl ColorTransfer {
    /// Named transfer function expressing the same curve.
    pub const fn named(self) -> Option<TransferFunctions> {
        Some(match self {
            Self::Bt709 | Self::Smpte170M | Self::Bt2020_10 | Self::Bt2020_12 => {
                TransferFunctions::BT1886
            }
            Self::Bt470M => TransferFunctions::GAMMA22,
            Self::Bt470Bg => TransferFunctions::GAMMA28,
            Self::Smpte240M => TransferFunctions::ST240,
            Self::Linear => TransferFunctions::EXT_LINEAR,
            Self::Iec61966_2_1 => TransferFunctions::SRGB,
            Self::Smpte2084 => TransferFunctions::ST2084_PQ,
            Self::Smpte428 => TransferFunctions::ST428,
            Self::AribStdB67 => TransferFunctions::HLG,
            Self::Unspecified => return None,
        })
    }
}

/// Color primaries of decoded video.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ColorPrimaries {
    #[default]
    Unspecified,
    Bt709,
    Bt470M,
    Bt470Bg,
    Smpte170M,
    Smpte240M,
    Film,
    Bt2020,
    Smpte428,
    Smpte431,
    Smpte432,
}

impl ColorPrimaries {
    pub const fn named(self) -> Option<NamedPrimaries> {
        Some(match self {
            Self::Bt709 => NamedPrimaries::SRGB,
            Self::Bt470M => NamedPrimaries::PAL_M,
            Self::Bt470Bg => NamedPrimaries::PAL,
            Self::Smpte170M | Self::Smpte240M => NamedPrimaries::NTSC,
            Self::Film => NamedPrimaries::GENERIC_FILM,
            Self::Bt2020 => NamedPrimaries::BT2020,
            Self::Smpte428 => NamedPrimaries::CIE1931_XYZ,
            Self::Smpte431 => NamedPrimaries::DCI_P3,
            Self::Smpte432 => NamedPrimaries::DISPLAY_P3,
            Self::Unspecified => return None,
        })
    }
}

/// SMPTE ST 2086 mastering display colour volume.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MasteringDisplay {
    /// CIE 1931 xy of red, green and blue.
    pub primaries: [[f64; 2]; 3],
    pub white_point: [f64; 2],
    /// cd/m²
    pub min_luminance: f64,
    /// cd/m²
    pub max_luminance: f64,
}

/// CTA-861.3 content light level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContentLightLevel {
    pub max_cll: u32,
    pub max_fall: u32,
}

/// Colorimetry of the picture about to be rendered.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct VideoPicture {
    pub color_transfer: ColorTransfer,
    pub color_primaries: ColorPrimaries,
    pub mastering_display: Option<MasteringDisplay>,
    pub content_light_level: Option<ContentLightLevel>,
}

/// Everything the compositor announced after bind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ColorSupport {
    pub intents: RenderIntents,
    pub features: ColorFeatures,
    pub transfer_functions: TransferFunctions,
    pub primaries: NamedPrimaries,
    /// `done` was received.
    pub complete: bool,
}

impl ColorSupport {
    fn handle_event(&mut self, event: &Event) {
        match event {
            Event::SupportedIntent(value) => {
                self.intents |= RenderIntents::from_bits_truncate(bit(*value));
            }
            Event::SupportedFeature(value) => {
                self.features |= ColorFeatures::from_bits_truncate(bit(*value));
            }
            Event::SupportedTfNamed(value) => {
                self.transfer_functions |= TransferFunctions::from_bits_truncate(bit(*value));
            }
            Event::SupportedPrimariesNamed(value) => {
                self.primaries |= NamedPrimaries::from_bits_truncate(bit(*value));
            }
            Event::ColorManagerDone => self.complete = true,
            _ => {}
        }
    }
}

fn chromaticity([x, y]: [f64; 2]) -> Chromaticity {
    Chromaticity {
        x: (x * 1_000_000.0).round() as i32,
        y: (y * 1_000_000.0).round() as i32,
    }
}

#[derive(Debug, Default)]
struct Descriptions {
    /// Created and not yet answered by the compositor.
    requested: Option<ObjectId>,
    /// Currently set on the surface.
    applied: Option<ObjectId>,
}

/// HDR metadata negotiation for one surface.
pub struct ColorManager {
    connection: Connection,
    registry: Registry,
    manager: Option<ObjectId>,
    color_surface: Option<ObjectId>,
    support: Arc<Mutex<ColorSupport>>,
    descriptions: Arc<Mutex<Descriptions>>,
    hdr_enabled: bool,
}

impl ColorManager {
    /// Bind the color manager if the compositor offers one and attach it
    /// to `surface`. Performs a roundtrip.
    pub fn new(
        connection: &Connection,
        surface: ObjectId,
        hdr_enabled: bool,
    ) -> Result<Self, RegistryError> {
        let support = Arc::new(Mutex::new(ColorSupport::default()));
        let mut registry = Registry::new(connection);
        let manager = {
            let support = Arc::clone(&support);
            registry.request_singleton_with_listener(
                Interface::ColorManager,
                1,
                1,
                false,
                listener(move |_, event| support.lock().handle_event(event)),
            )?
        };
        registry.bind()?;

        let manager = manager.object();
        let color_surface = match manager {
            Some(manager) => {
                let color_surface =
                    connection
                        .wire()
                        .create(manager, Create::ColorSurface { surface }, None)?;
                let support = *support.lock();
                info!(
                    "Color management available: features {:?}, transfer functions {:?}, primaries {:?}",
                    support.features, support.transfer_functions, support.primaries
                );
                Some(color_surface)
            }
            None => {
                debug!("Compositor has no color management");
                None
            }
        };

        Ok(Self {
            connection: connection.clone(),
            registry,
            manager,
            color_surface,
            support,
            descriptions: Arc::new(Mutex::new(Descriptions::default())),
            hdr_enabled,
        })
    }

    pub fn is_available(&self) -> bool {
        self.color_surface.is_some()
    }

    pub fn support(&self) -> ColorSupport {
        *self.support.lock()
    }

    /// Image description currently set on the surface.
    pub fn applied_description(&self) -> Option<ObjectId> {
        self.descriptions.lock().applied
    }

    /// Describe `picture` to the compositor. Returns `false` (and reverts
    /// the surface to the default description) if HDR is disabled or the
    /// compositor cannot express the picture's colorimetry.
    pub fn set_hdr(&self, picture: &VideoPicture) -> Result<bool, WireError> {
        let (Some(manager), Some(_)) = (self.manager, self.color_surface) else {
            return Ok(false);
        };
        let support = *self.support.lock();

        let transfer = picture
            .color_transfer
            .named()
            .filter(|tf| support.transfer_functions.contains(*tf));
        let primaries = picture
            .color_primaries
            .named()
            .filter(|p| support.primaries.contains(*p));

        let (Some(transfer), Some(primaries)) = (transfer, primaries) else {
            debug!(
                "Cannot describe {:?} / {:?} to the compositor",
                picture.color_transfer, picture.color_primaries
            );
            self.unset()?;
            return Ok(false);
        };
        if !self.hdr_enabled || !support.features.contains(ColorFeatures::PARAMETRIC) {
            self.unset()?;
            return Ok(false);
        }

        let wire = self.connection.wire();
        let creator = wire.create(manager, Create::ParametricCreator, None)?;
        wire.send(creator, Request::SetTfNamed(wire_value(transfer.bits())))?;
        wire.send(creator, Request::SetPrimariesNamed(wire_value(primaries.bits())))?;

        if let Some(mastering) = picture.mastering_display {
            if support
                .features
                .contains(ColorFeatures::SET_MASTERING_DISPLAY_PRIMARIES)
            {
                wire.send(
                    creator,
                    Request::SetMasteringDisplayPrimaries {
                        red: chromaticity(mastering.primaries[0]),
                        green: chromaticity(mastering.primaries[1]),
                        blue: chromaticity(mastering.primaries[2]),
                        white: chromaticity(mastering.white_point),
                    },
                )?;
            }
            wire.send(
                creator,
                Request::SetMasteringLuminance {
                    min: (mastering.min_luminance * 10_000.0).round() as u32,
                    max: mastering.max_luminance.round() as u32,
                },
            )?;
        }
        if let Some(light) = picture.content_light_level {
            wire.send(creator, Request::SetMaxCll(light.max_cll))?;
            wire.send(creator, Request::SetMaxFall(light.max_fall))?;
        }

        let description = wire.create(
            creator,
            Create::ImageDescription,
            Some(self.description_listener()),
        )?;
        let superseded = self.descriptions.lock().requested.replace(description);
        if let Some(superseded) = superseded {
            wire.destroy(superseded);
        }
        debug!("Requested image description {description}: {transfer:?} {primaries:?}");
        Ok(true)
    }

    /// Revert the surface to the compositor's default description.
    pub fn unset(&self) -> Result<(), WireError> {
        let Some(color_surface) = self.color_surface else {
            return Ok(());
        };
        let (requested, applied) = {
            let mut descriptions = self.descriptions.lock();
            (descriptions.requested.take(), descriptions.applied.take())
        };
        let wire = self.connection.wire();
        if let Some(requested) = requested {
            wire.destroy(requested);
        }
        if let Some(applied) = applied {
            wire.send(color_surface, Request::UnsetImageDescription)?;
            wire.destroy(applied);
        }
        Ok(())
    }

    fn description_listener(&self) -> crate::wire::Listener {
        let descriptions = Arc::downgrade(&self.descriptions);
        let weak_connection: WeakConnection = self.connection.downgrade();
        let color_surface = self.color_surface;
        listener(move |description, event| {
            let (Some(descriptions), Some(connection), Some(color_surface)) = (
                descriptions.upgrade(),
                weak_connection.upgrade(),
                color_surface,
            ) else {
                return;
            };
            let wire = connection.wire();
            match event {
                Event::ImageDescriptionReady { identity } => {
                    let previous = {
                        let mut descriptions = descriptions.lock();
                        if descriptions.requested != Some(description) {
                            None
                        } else {
                            descriptions.requested = None;
                            Some(descriptions.applied.replace(description))
                        }
                    };
                    let Some(previous) = previous else {
                        wire.destroy(description);
                        return;
                    };
                    debug!("Image description {description} ready (identity {identity})");
                    if let Err(err) = wire.send(
                        color_surface,
                        Request::SetImageDescription {
                            description,
                            render_intent: 0,
                        },
                    ) {
                        warn!("Failed to set image description: {err}");
                    }
                    if let Some(previous) = previous {
                        wire.destroy(previous);
                    }
                }
                Event::ImageDescriptionFailed { cause, message } => {
                    warn!("Compositor rejected image description ({cause}): {message}");
                    let mut descriptions = descriptions.lock();
                    if descriptions.requested == Some(description) {
                        descriptions.requested = None;
                    }
                    drop(descriptions);
                    wire.destroy(description);
                }
                _ => {}
            }
        })
    }
}

impl Drop for ColorManager {
    fn drop(&mut self) {
        let wire = self.connection.wire();
        let descriptions = std::mem::take(&mut *self.descriptions.lock());
        for description in [descriptions.requested, descriptions.applied].into_iter().flatten() {
            wire.destroy(description);
        }
        if let Some(color_surface) = self.color_surface.take() {
            wire.destroy(color_surface);
        }
        self.registry.unbind_singletons();
    }
}

impl std::fmt::Debug for ColorManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ColorManager")
            .field("color_surface", &self.color_surface)
            .field("support", &*self.support.lock())
            .field("hdr_enabled", &self.hdr_enabled)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeColorSupport, FakeCompositor};
    use pretty_assertions::assert_eq;

    fn hdr10() -> VideoPicture {
        VideoPicture {
            color_transfer: ColorTransfer::Smpte2084,
            color_primaries: ColorPrimaries::Bt2020,
            mastering_display: Some(MasteringDisplay {
                primaries: [[0.708, 0.292], [0.170, 0.797], [0.131, 0.046]],
                white_point: [0.3127, 0.3290],
                min_luminance: 0.005,
                max_luminance: 1000.0,
            }),
            content_light_level: Some(ContentLightLevel {
                max_cll: 1000,
                max_fall: 400,
            }),
        }
    }

    fn full_support() -> FakeColorSupport {
        FakeColorSupport {
            intents: vec![0],
            features: vec![1, 4, 5],
            transfer_functions: vec![1, 9, 11, 13],
            primaries: vec![1, 3, 6],
        }
    }

    fn setup(
        support: Option<FakeColorSupport>,
        hdr_enabled: bool,
    ) -> (Arc<FakeCompositor>, Connection, ColorManager) {
        let fake = FakeCompositor::desktop();
        if let Some(support) = support {
            fake.add_color_manager(support);
        }
        let connection = fake.connection();
        let mut registry = Registry::new(&connection);
        let compositor = registry
            .request_singleton(Interface::Compositor, 1, 4, true)
            .unwrap();
        registry.bind().unwrap();
        let surface = connection
            .wire()
            .create(compositor.object().unwrap(), Create::Surface, None)
            .unwrap();
        let manager = ColorManager::new(&connection, surface, hdr_enabled).unwrap();
        (fake, connection, manager)
    }

    #[test]
    fn test_support_sets_are_collected() {
        let (_fake, _connection, manager) = setup(Some(full_support()), true);
        let support = manager.support();
        assert!(support.complete);
        assert_eq!(support.intents, RenderIntents::PERCEPTUAL);
        assert!(support.features.contains(ColorFeatures::PARAMETRIC));
        assert!(support.transfer_functions.contains(TransferFunctions::ST2084_PQ));
        assert_eq!(
            support.primaries,
            NamedPrimaries::SRGB | NamedPrimaries::PAL | NamedPrimaries::BT2020
        );
    }

    #[test]
    fn test_hdr10_description_is_built_and_applied() {
        let (fake, connection, manager) = setup(Some(full_support()), true);
        assert!(manager.set_hdr(&hdr10()).unwrap());
        assert_eq!(
            fake.requests_of(Interface::ImageDescriptionCreator),
            vec![
                Request::SetTfNamed(11),
                Request::SetPrimariesNamed(6),
                Request::SetMasteringDisplayPrimaries {
                    red: Chromaticity { x: 708_000, y: 292_000 },
                    green: Chromaticity { x: 170_000, y: 797_000 },
                    blue: Chromaticity { x: 131_000, y: 46_000 },
                    white: Chromaticity { x: 312_700, y: 329_000 },
                },
                Request::SetMasteringLuminance { min: 50, max: 1000 },
                Request::SetMaxCll(1000),
                Request::SetMaxFall(400),
            ]
        );

        connection.roundtrip().unwrap();
        let description = manager.applied_description().unwrap();
        assert_eq!(
            fake.requests_of(Interface::ColorManagementSurface),
            vec![Request::SetImageDescription {
                description,
                render_intent: 0,
            }]
        );
    }

    #[test]
    fn test_unsupported_primaries_fail_closed() {
        let support = FakeColorSupport {
            primaries: vec![1, 3],
            ..full_support()
        };
        let (fake, connection, manager) = setup(Some(support), true);

        // Get an SDR-compatible description applied first.
        let hlg_709 = VideoPicture {
            color_transfer: ColorTransfer::AribStdB67,
            color_primaries: ColorPrimaries::Bt709,
            ..VideoPicture::default()
        };
        assert!(manager.set_hdr(&hlg_709).unwrap());
        connection.roundtrip().unwrap();
        let applied = manager.applied_description().unwrap();

        assert!(!manager.set_hdr(&hdr10()).unwrap());
        assert_eq!(manager.applied_description(), None);
        assert!(!fake.is_alive(applied));
        assert_eq!(
            fake.requests_of(Interface::ColorManagementSurface).last(),
            Some(&Request::UnsetImageDescription)
        );
        assert_eq!(fake.objects_of(Interface::ImageDescriptionCreator), vec![]);
    }

    #[test]
    fn test_disabled_hdr_never_creates_descriptions() {
        let (fake, _connection, manager) = setup(Some(full_support()), false);
        assert!(!manager.set_hdr(&hdr10()).unwrap());
        assert!(fake.requests_of(Interface::ImageDescriptionCreator).is_empty());
    }

    #[test]
    fn test_mastering_primaries_need_feature() {
        let support = FakeColorSupport {
            features: vec![1],
            ..full_support()
        };
        let (fake, _connection, manager) = setup(Some(support), true);
        assert!(manager.set_hdr(&hdr10()).unwrap());
        let requests = fake.requests_of(Interface::ImageDescriptionCreator);
        assert!(!requests
            .iter()
            .any(|r| matches!(r, Request::SetMasteringDisplayPrimaries { .. })));
        assert!(requests.contains(&Request::SetMasteringLuminance { min: 50, max: 1000 }));
    }

    #[test]
    fn test_failed_description_is_not_applied() {
        let (fake, connection, manager) = setup(Some(full_support()), true);
        fake.fail_image_descriptions(true);
        assert!(manager.set_hdr(&hdr10()).unwrap());
        connection.roundtrip().unwrap();
        assert_eq!(manager.applied_description(), None);
        assert!(fake.requests_of(Interface::ColorManagementSurface).is_empty());
    }

    #[test]
    fn test_without_color_manager() {
        let (_fake, _connection, manager) = setup(None, true);
        assert!(!manager.is_available());
        assert!(!manager.set_hdr(&hdr10()).unwrap());
    }

    #[test]
    fn test_named_mappings() {
        assert_eq!(ColorTransfer::Bt709.named(), Some(TransferFunctions::BT1886));
        assert_eq!(ColorTransfer::Unspecified.named(), None);
        assert_eq!(wire_value(TransferFunctions::HLG.bits()), 13);
        assert_eq!(wire_value(NamedPrimaries::BT2020.bits()), 6);
        assert_eq!(ColorPrimaries::Smpte240M.named(), Some(NamedPrimaries::NTSC));
    }
}
