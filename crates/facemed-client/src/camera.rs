//! 摄像头租约
//!
//! [`CameraLease`] 在创建时启动设备，在离开作用域时停止所有轨道，
//! 无论是正常返回、提前返回、错误还是 panic。

use facemed_core::{FacemedError, ImageUpload, Result};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// 图像采集设备
pub trait CameraDevice {
    /// 启动采集
    fn start(&mut self) -> Result<()>;

    /// 采集一帧
    fn capture(&mut self) -> Result<ImageUpload>;

    /// 停止全部轨道，必须可重复调用
    fn stop_all_tracks(&mut self);

    fn is_active(&self) -> bool;
}

/// 摄像头的作用域租约
pub struct CameraLease<'a, D: CameraDevice> {
    device: &'a mut D,
}

impl<'a, D: CameraDevice> CameraLease<'a, D> {
    /// 启动设备并返回租约，启动失败时设备会被释放
    pub fn acquire(device: &'a mut D) -> Result<Self> {
        if let Err(e) = device.start() {
            warn!("Camera failed to start: {}", e);
            device.stop_all_tracks();
            return Err(e);
        }
        debug!("Camera lease acquired");
        Ok(Self { device })
    }

    pub fn capture(&mut self) -> Result<ImageUpload> {
        self.device.capture()
    }
}

impl<D: CameraDevice> Drop for CameraLease<'_, D> {
    fn drop(&mut self) {
        self.device.stop_all_tracks();
        debug!("Camera lease released");
    }
}

/// 从磁盘读取图像的设备，供命令行使用
#[derive(Debug)]
pub struct FileCamera {
    path: PathBuf,
    active: bool,
}

impl FileCamera {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            active: false,
        }
    }
}

impl CameraDevice for FileCamera {
    fn start(&mut self) -> Result<()> {
        if !self.path.is_file() {
            return Err(FacemedError::Io(format!("Image file not found: {}", self.path.display())));
        }
        self.active = true;
        info!("Using image file {}", self.path.display());
        Ok(())
    }

    fn capture(&mut self) -> Result<ImageUpload> {
        if !self.active {
            return Err(FacemedError::Io("Camera is not started".to_string()));
        }
        let bytes = std::fs::read(&self.path)?;
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "capture.jpg".to_string());
        Ok(ImageUpload::new(file_name, bytes))
    }

    fn stop_all_tracks(&mut self) {
        self.active = false;
    }

    fn is_active(&self) -> bool {
        self.active
    }
}
