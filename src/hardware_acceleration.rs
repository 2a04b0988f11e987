//! Hardware device contexts and surface-format negotiation.
//!
//! [`HardwareBackend`] is the closed set of acceleration APIs this crate
//! knows how to drive. A backend resolves to a [`DeviceContext`] (an open
//! FFmpeg device, shared via [`Arc`] by the decoder and every filter stage
//! that needs device affinity) and to a preferred surface format used when
//! the decoder negotiates its output.
//!
//! [`FramePool`] is the per-stream pool of device surfaces the decoder
//! allocates from. It only exists once the first frame has been decoded,
//! which is why the filter graph is built lazily.
//!
//! # Platform Support
//!
//! Which backends work depends on both the FFmpeg build and the host's
//! drivers; [`available_backends`] reports what the linked FFmpeg supports.

use std::ffi::CString;
use std::fmt::{Debug, Display, Formatter, Result as FmtResult};
use std::ptr;
use std::sync::Arc;

use ffmpeg_next::format::Pixel;
use ffmpeg_sys_next::{
    AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX, AVBufferRef, AVCodec, AVCodecHWConfig,
    AVHWDeviceType, AVHWFramesContext, AVPixelFormat,
};

use crate::error::HwsnapError;
use crate::frame::DecodedFrame;

/// Supported hardware acceleration backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HardwareBackend {
    /// Video Acceleration API (Linux).
    Vaapi,
    /// NVIDIA CUDA / NVDEC.
    Cuda,
    /// Intel Quick Sync Video.
    Qsv,
    /// Video Decode and Presentation API for Unix.
    Vdpau,
    /// DirectX Video Acceleration 2 (Windows).
    Dxva2,
    /// Direct3D 11 Video Acceleration (Windows).
    D3d11va,
    /// Apple VideoToolbox.
    VideoToolbox,
}

impl HardwareBackend {
    /// Every backend, in the order names are matched.
    pub const ALL: [HardwareBackend; 7] = [
        HardwareBackend::Vaapi,
        HardwareBackend::Cuda,
        HardwareBackend::Qsv,
        HardwareBackend::Vdpau,
        HardwareBackend::Dxva2,
        HardwareBackend::D3d11va,
        HardwareBackend::VideoToolbox,
    ];

    /// FFmpeg's name for the backend.
    pub fn name(self) -> &'static str {
        match self {
            HardwareBackend::Vaapi => "vaapi",
            HardwareBackend::Cuda => "cuda",
            HardwareBackend::Qsv => "qsv",
            HardwareBackend::Vdpau => "vdpau",
            HardwareBackend::Dxva2 => "dxva2",
            HardwareBackend::D3d11va => "d3d11va",
            HardwareBackend::VideoToolbox => "videotoolbox",
        }
    }

    /// Resolve a backend by name (case-insensitive).
    ///
    /// # Errors
    ///
    /// [`HwsnapError::UnknownBackend`], listing the backends the linked
    /// FFmpeg supports.
    pub fn from_name(name: &str) -> Result<Self, HwsnapError> {
        let wanted = name.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|backend| backend.name() == wanted)
            .ok_or_else(|| HwsnapError::UnknownBackend {
                name: name.to_string(),
                supported: available_backends()
                    .into_iter()
                    .map(|backend| backend.name().to_string())
                    .collect(),
            })
    }

    pub(crate) fn av_device_type(self) -> AVHWDeviceType {
        match self {
            HardwareBackend::Vaapi => AVHWDeviceType::AV_HWDEVICE_TYPE_VAAPI,
            HardwareBackend::Cuda => AVHWDeviceType::AV_HWDEVICE_TYPE_CUDA,
            HardwareBackend::Qsv => AVHWDeviceType::AV_HWDEVICE_TYPE_QSV,
            HardwareBackend::Vdpau => AVHWDeviceType::AV_HWDEVICE_TYPE_VDPAU,
            HardwareBackend::Dxva2 => AVHWDeviceType::AV_HWDEVICE_TYPE_DXVA2,
            HardwareBackend::D3d11va => AVHWDeviceType::AV_HWDEVICE_TYPE_D3D11VA,
            HardwareBackend::VideoToolbox => AVHWDeviceType::AV_HWDEVICE_TYPE_VIDEOTOOLBOX,
        }
    }

    fn from_av_device_type(device_type: AVHWDeviceType) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|backend| backend.av_device_type() == device_type)
    }

    /// The surface format decoders produce for this backend.
    ///
    /// Depends only on the backend, never on the device instance, so the
    /// decoder can negotiate before any frame exists.
    pub fn preferred_format(self) -> Pixel {
        let raw = match self {
            HardwareBackend::Vaapi => AVPixelFormat::AV_PIX_FMT_VAAPI,
            HardwareBackend::Cuda => AVPixelFormat::AV_PIX_FMT_CUDA,
            HardwareBackend::Qsv => AVPixelFormat::AV_PIX_FMT_QSV,
            HardwareBackend::Vdpau => AVPixelFormat::AV_PIX_FMT_VDPAU,
            HardwareBackend::Dxva2 => AVPixelFormat::AV_PIX_FMT_DXVA2_VLD,
            HardwareBackend::D3d11va => AVPixelFormat::AV_PIX_FMT_D3D11,
            HardwareBackend::VideoToolbox => AVPixelFormat::AV_PIX_FMT_VIDEOTOOLBOX,
        };
        Pixel::from(raw)
    }

    /// Device opened when no path is given. `None` lets the driver choose.
    pub fn default_device(self) -> Option<&'static str> {
        match self {
            HardwareBackend::Vaapi => Some("/dev/dri/renderD128"),
            _ => None,
        }
    }

    /// The device-side scaling filter, when the backend has one.
    pub fn scale_filter(self) -> Option<&'static str> {
        match self {
            HardwareBackend::Vaapi => Some("scale_vaapi"),
            HardwareBackend::Cuda => Some("scale_cuda"),
            HardwareBackend::Qsv => Some("scale_qsv"),
            _ => None,
        }
    }
}

impl Display for HardwareBackend {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.write_str(self.name())
    }
}

/// List the backends supported by the linked FFmpeg build.
pub fn available_backends() -> Vec<HardwareBackend> {
    let mut backends = Vec::new();
    let mut device_type = AVHWDeviceType::AV_HWDEVICE_TYPE_NONE;

    loop {
        device_type = unsafe { ffmpeg_sys_next::av_hwdevice_iterate_types(device_type) };
        if device_type == AVHWDeviceType::AV_HWDEVICE_TYPE_NONE {
            break;
        }
        if let Some(backend) = HardwareBackend::from_av_device_type(device_type) {
            backends.push(backend);
        }
    }

    backends
}

/// An open hardware device.
///
/// Created once per run and shared by reference counting. The FFmpeg device
/// reference is released when the last holder drops; frame pools keep
/// their own reference, so they always drain first.
pub struct DeviceContext {
    backend: HardwareBackend,
    device: Option<String>,
    buffer: *mut AVBufferRef,
}

// SAFETY: the device buffer is reference-counted with atomics inside FFmpeg
// and is never mutated after creation.
unsafe impl Send for DeviceContext {}
unsafe impl Sync for DeviceContext {}

impl DeviceContext {
    /// Open a device for `backend`.
    ///
    /// `device` overrides [`HardwareBackend::default_device`].
    ///
    /// # Errors
    ///
    /// [`HwsnapError::DeviceUnavailable`] when the device is missing or busy.
    /// There is no retry.
    pub fn create(backend: HardwareBackend, device: Option<&str>) -> Result<Arc<Self>, HwsnapError> {
        let device = device.or(backend.default_device()).map(str::to_string);
        let unavailable = |reason: String| HwsnapError::DeviceUnavailable {
            backend: backend.name().to_string(),
            device: device.clone().unwrap_or_else(|| "default".to_string()),
            reason,
        };

        let device_name = device
            .as_deref()
            .map(CString::new)
            .transpose()
            .map_err(|_| unavailable("device path contains a NUL byte".to_string()))?;

        let mut buffer: *mut AVBufferRef = ptr::null_mut();
        let result = unsafe {
            ffmpeg_sys_next::av_hwdevice_ctx_create(
                &mut buffer,
                backend.av_device_type(),
                device_name.as_ref().map_or(ptr::null(), |name| name.as_ptr()),
                ptr::null_mut(),
                0,
            )
        };

        if result < 0 || buffer.is_null() {
            return Err(unavailable(ffmpeg_next::Error::from(result).to_string()));
        }

        log::debug!(
            "Opened {backend} device {}",
            device.as_deref().unwrap_or("(driver default)")
        );

        Ok(Arc::new(Self {
            backend,
            device,
            buffer,
        }))
    }

    /// The backend this device belongs to.
    pub fn backend(&self) -> HardwareBackend {
        self.backend
    }

    /// The device path that was opened, if one was given.
    pub fn device(&self) -> Option<&str> {
        self.device.as_deref()
    }

    /// A new FFmpeg reference to the device, owned by the caller.
    pub(crate) fn new_ref(&self) -> *mut AVBufferRef {
        unsafe { ffmpeg_sys_next::av_buffer_ref(self.buffer) }
    }

    fn data(&self) -> *mut u8 {
        unsafe { (*self.buffer).data }
    }
}

impl Debug for DeviceContext {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DeviceContext")
            .field("backend", &self.backend)
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        if !self.buffer.is_null() {
            unsafe { ffmpeg_sys_next::av_buffer_unref(&mut self.buffer) };
        }
    }
}

/// A decoder's pool of device surfaces (`hw_frames_ctx`).
pub struct FramePool {
    buffer: *mut AVBufferRef,
}

impl FramePool {
    /// Take a new reference to a borrowed frames context.
    ///
    /// # Safety
    ///
    /// `buffer` must be null or a valid `AVBufferRef` wrapping an
    /// `AVHWFramesContext`.
    pub(crate) unsafe fn from_borrowed(buffer: *mut AVBufferRef) -> Option<Self> {
        if buffer.is_null() {
            return None;
        }
        let buffer = unsafe { ffmpeg_sys_next::av_buffer_ref(buffer) };
        (!buffer.is_null()).then_some(Self { buffer })
    }

    pub(crate) fn as_ptr(&self) -> *mut AVBufferRef {
        self.buffer
    }

    fn context(&self) -> &AVHWFramesContext {
        unsafe { &*((*self.buffer).data as *const AVHWFramesContext) }
    }

    /// Surface format of frames in the pool.
    pub fn surface_format(&self) -> Pixel {
        Pixel::from(self.context().format)
    }

    /// Host-memory format surfaces download to by default.
    pub fn software_format(&self) -> Pixel {
        Pixel::from(self.context().sw_format)
    }

    /// Allocated surface width.
    pub fn width(&self) -> u32 {
        self.context().width.max(0) as u32
    }

    /// Allocated surface height.
    pub fn height(&self) -> u32 {
        self.context().height.max(0) as u32
    }

    /// `true` if the pool was allocated on `device`.
    pub fn shares_device(&self, device: &DeviceContext) -> bool {
        let device_ref = self.context().device_ref;
        !device_ref.is_null() && unsafe { (*device_ref).data } == device.data()
    }
}

impl Clone for FramePool {
    fn clone(&self) -> Self {
        Self {
            buffer: unsafe { ffmpeg_sys_next::av_buffer_ref(self.buffer) },
        }
    }
}

impl Debug for FramePool {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("FramePool")
            .field("surface_format", &self.surface_format())
            .field("software_format", &self.software_format())
            .field("width", &self.width())
            .field("height", &self.height())
            .finish()
    }
}

impl Drop for FramePool {
    fn drop(&mut self) {
        if !self.buffer.is_null() {
            unsafe { ffmpeg_sys_next::av_buffer_unref(&mut self.buffer) };
        }
    }
}

/// Pick the first candidate equal to the backend's preferred format.
///
/// `candidates` is in the decoder's rank order.
pub fn negotiate_format(candidates: &[Pixel], preferred: Pixel) -> Option<Pixel> {
    candidates.iter().copied().find(|&format| format == preferred)
}

/// Surface formats a codec can decode into through `backend`'s device
/// context, in the codec's rank order.
///
/// # Safety
///
/// `codec` must be null or point to a registered `AVCodec`.
pub(crate) unsafe fn hardware_candidates(codec: *const AVCodec, backend: HardwareBackend) -> Vec<Pixel> {
    let mut candidates = Vec::new();
    if codec.is_null() {
        return candidates;
    }

    let mut index: i32 = 0;
    loop {
        let config: *const AVCodecHWConfig = unsafe { ffmpeg_sys_next::avcodec_get_hw_config(codec, index) };
        if config.is_null() {
            break;
        }

        let (methods, device_type, pix_fmt) =
            unsafe { ((*config).methods, (*config).device_type, (*config).pix_fmt) };
        if methods & (AV_CODEC_HW_CONFIG_METHOD_HW_DEVICE_CTX as i32) != 0
            && device_type == backend.av_device_type()
        {
            candidates.push(Pixel::from(pix_fmt));
        }

        index += 1;
    }

    candidates
}

/// Copy a hardware frame into system memory.
///
/// Host-memory frames are rejected; callers check
/// [`DecodedFrame::is_hardware_resident`] first.
///
/// # Errors
///
/// [`HwsnapError::TransferError`] when the frame has no device pool or
/// FFmpeg fails the download.
pub fn transfer_hardware_frame(hardware_frame: &DecodedFrame) -> Result<DecodedFrame, HwsnapError> {
    if !hardware_frame.is_hardware_resident() {
        return Err(HwsnapError::TransferError(format!(
            "frame is already in system memory ({:?})",
            hardware_frame.format().pixel()
        )));
    }
    if hardware_frame.frame_pool().is_none() {
        return Err(HwsnapError::TransferError(
            "hardware frame has no device frame pool".to_string(),
        ));
    }

    let mut software_frame = ffmpeg_next::frame::Video::empty();
    let source = unsafe { hardware_frame.as_ffmpeg().as_ptr() };
    let result =
        unsafe { ffmpeg_sys_next::av_hwframe_transfer_data(software_frame.as_mut_ptr(), source, 0) };
    if result < 0 {
        return Err(HwsnapError::TransferError(format!(
            "{} (surface format {:?})",
            ffmpeg_next::Error::from(result),
            hardware_frame.format().pixel()
        )));
    }

    let result = unsafe { ffmpeg_sys_next::av_frame_copy_props(software_frame.as_mut_ptr(), source) };
    if result < 0 {
        return Err(HwsnapError::TransferError(format!(
            "copying frame properties failed: {}",
            ffmpeg_next::Error::from(result)
        )));
    }

    Ok(DecodedFrame::from_ffmpeg(software_frame))
}
