use std::env;
use std::path::PathBuf;

const WATCHED: [&str; 4] = ["FFMPEG_DIR", "VCPKG_ROOT", "VCPKGRS_DYNAMIC", "VCPKGRS_TRIPLET"];

fn warn(message: impl AsRef<str>) {
    println!("cargo:warning={}", message.as_ref());
}

/// Point Windows builds at a vcpkg FFmpeg when `FFMPEG_DIR` is unset.
///
/// ffmpeg-sys-next does the actual discovery; this only explains what it
/// will look for, since a missing FFmpeg otherwise fails deep inside bindgen.
fn main() {
    for variable in WATCHED {
        println!("cargo:rerun-if-env-changed={variable}");
    }

    if env::var("CARGO_CFG_TARGET_OS").as_deref() != Ok("windows")
        || env::var_os("FFMPEG_DIR").is_some()
    {
        return;
    }

    let Some(vcpkg_root) = env::var_os("VCPKG_ROOT") else {
        warn(
            "FFMPEG_DIR is not set. Install FFmpeg with vcpkg (with the dxva2/d3d11va \
             features for hardware decoding) and set VCPKG_ROOT or FFMPEG_DIR.",
        );
        return;
    };

    let triplet = env::var("VCPKGRS_TRIPLET").unwrap_or_else(|_| "x64-windows".to_string());
    let installed = PathBuf::from(vcpkg_root).join("installed").join(&triplet);

    if !installed.exists() {
        warn(format!(
            "VCPKG_ROOT is set but {} does not exist; FFmpeg for {triplet} is not installed.",
            installed.display()
        ));
        return;
    }

    warn(format!(
        "Using vcpkg FFmpeg at {0}. Set FFMPEG_DIR={0} to silence this.",
        installed.display()
    ));
    if env::var_os("VCPKGRS_DYNAMIC").is_none() {
        warn("Set VCPKGRS_DYNAMIC=1 when linking a dynamic vcpkg FFmpeg build.");
    }
}
