//! 体数据文件读写.
//!
//! 支持三种格式:
//!
//! 1. SCANCO AIM (`.aim`, 可带 VMS 版本后缀 `;n`), 日志嵌入文件头.
//! 2. NIfTI (`.nii`, `.nii.gz`), 日志存放在同名 `.log` 旁挂文件中.
//! 3. DICOM (`.dcm` 单文件, 或一个目录下的序列), 日志存放在 ImageComments 中.
//!
//! 扩展名无法识别时按魔数判断.

use std::fs::File;
use std::io::Read;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use ndarray::Array3;

use crate::consts::aim::V030_MAGIC;
use crate::data::{Scalars, ScalarType, Volume};
use crate::error::{IplError, IplResult};
use crate::Idx3d;

pub mod aim;
pub mod dataset;
pub mod dicom;
pub mod nifti;

pub use dataset::{data_dir, data_dir_with, DATA_DIR_ENV};

/// 文件格式.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Format {
    /// SCANCO AIM.
    Aim,

    /// NIfTI-1, 可以是 gzip 压缩的.
    Nifti,

    /// DICOM 单文件或目录序列.
    Dicom,
}

/// 嗅探魔数所需读取的字节数.
const SNIFF_LEN: usize = 352;

impl Format {
    /// 仅按文件名判断格式. 忽略大小写与 `;n` 版本后缀.
    pub fn from_name(path: &Path) -> Option<Self> {
        let name = path.file_name()?.to_str()?.to_ascii_lowercase();
        let name = match name.rsplit_once(';') {
            Some((stem, ver)) if ver.chars().all(|c| c.is_ascii_digit()) => stem.to_owned(),
            _ => name,
        };
        if name.ends_with(".aim") {
            Some(Format::Aim)
        } else if name.ends_with(".nii") || name.ends_with(".nii.gz") {
            Some(Format::Nifti)
        } else if name.ends_with(".dcm") {
            Some(Format::Dicom)
        } else {
            None
        }
    }

    /// 按文件开头的字节判断格式.
    pub fn sniff(head: &[u8]) -> Option<Self> {
        if head.starts_with(&V030_MAGIC[..12]) {
            return Some(Format::Aim);
        }
        if head.len() >= 8
            && LittleEndian::read_i32(&head[0..4]) == crate::consts::aim::V020_PRE_HEADER_LEN as i32
            && LittleEndian::read_i32(&head[4..8]) == crate::consts::aim::V020_STRUCT_LEN as i32
        {
            return Some(Format::Aim);
        }
        if head.starts_with(&[0x1f, 0x8b]) {
            return Some(Format::Nifti);
        }
        if head.len() >= 347 && &head[344..347] == b"n+1" {
            return Some(Format::Nifti);
        }
        if head.len() >= 132 && &head[128..132] == b"DICM" {
            return Some(Format::Dicom);
        }
        None
    }

    /// 判断已存在的 `path` 的格式. 目录视为 DICOM 序列.
    pub fn detect(path: &Path) -> IplResult<Self> {
        if !path.exists() {
            return Err(IplError::InputNotFound(path.to_path_buf()));
        }
        if path.is_dir() {
            return Ok(Format::Dicom);
        }
        if let Some(f) = Self::from_name(path) {
            return Ok(f);
        }
        let mut head = Vec::with_capacity(SNIFF_LEN);
        File::open(path)?
            .take(SNIFF_LEN as u64)
            .read_to_end(&mut head)?;
        Self::sniff(&head).ok_or_else(|| {
            IplError::UnsupportedFormat(format!("cannot recognize {}", path.display()))
        })
    }
}

/// 读取体数据. 格式由扩展名或魔数决定.
///
/// 路径不存在或目录为空时返回 `InputNotFound`, 无法识别时返回 `UnsupportedFormat`.
pub fn read(path: impl AsRef<Path>) -> IplResult<Volume> {
    let path = path.as_ref();
    let format = Format::detect(path)?;
    log::info!("reading {} as {format:?}", path.display());
    let vol = match format {
        Format::Aim => aim::read(path)?,
        Format::Nifti => nifti::read(path)?,
        Format::Dicom => dicom::read(path)?,
    };
    log::debug!(
        "read {}: dims = {:?}, type = {}, log = {} bytes",
        path.display(),
        vol.dims(),
        vol.scalar_type(),
        vol.log().len()
    );
    Ok(vol)
}

/// 写入体数据. 格式由扩展名决定, 没有可识别的扩展名时写为 DICOM 序列目录.
pub fn write(vol: &Volume, path: impl AsRef<Path>) -> IplResult<()> {
    let path = path.as_ref();
    let format = Format::from_name(path).unwrap_or(Format::Dicom);
    log::info!("writing {} as {format:?}", path.display());
    match format {
        Format::Aim => aim::write(vol, path),
        Format::Nifti => nifti::write(vol, path),
        Format::Dicom => dicom::write(vol, path),
    }
}

/// 标量类型每个体素所占字节数.
#[inline]
pub(crate) fn bytes_per_voxel(ty: ScalarType) -> usize {
    match ty {
        ScalarType::I8 => 1,
        ScalarType::I16 => 2,
        ScalarType::F32 => 4,
    }
}

/// 以小端序, x 最快变化的顺序写出全部体素.
pub(crate) fn encode_scalars(scalars: &Scalars, out: &mut Vec<u8>) {
    out.reserve(scalars.len() * bytes_per_voxel(scalars.scalar_type()));
    // 写入 `Vec` 不会失败.
    match scalars {
        Scalars::I8(a) => out.extend(a.iter().map(|v| *v as u8)),
        Scalars::I16(a) => a.iter().for_each(|v| {
            let _ = out.write_i16::<LittleEndian>(*v);
        }),
        Scalars::F32(a) => a.iter().for_each(|v| {
            let _ = out.write_f32::<LittleEndian>(*v);
        }),
    }
}

/// 从小端序字节还原形状为 `shape` 的体素数组. 字节数不足时返回 `UnsupportedFormat`.
pub(crate) fn decode_scalars(bytes: &[u8], ty: ScalarType, shape: Idx3d) -> IplResult<Scalars> {
    let n = shape.0 * shape.1 * shape.2;
    let need = n * bytes_per_voxel(ty);
    if bytes.len() < need {
        return Err(IplError::UnsupportedFormat(format!(
            "voxel block holds {} bytes, {need} expected",
            bytes.len()
        )));
    }
    let bytes = &bytes[..need];
    let scalars = match ty {
        ScalarType::I8 => {
            let v = bytes.iter().map(|b| *b as i8).collect();
            Scalars::from_array(from_vec(shape, v)?)
        }
        ScalarType::I16 => {
            let mut v = vec![0i16; n];
            LittleEndian::read_i16_into(bytes, &mut v);
            Scalars::from_array(from_vec(shape, v)?)
        }
        ScalarType::F32 => {
            let mut v = vec![0f32; n];
            LittleEndian::read_f32_into(bytes, &mut v);
            Scalars::from_array(from_vec(shape, v)?)
        }
    };
    Ok(scalars)
}

#[inline]
fn from_vec<T>(shape: Idx3d, v: Vec<T>) -> IplResult<Array3<T>> {
    Array3::from_shape_vec(shape, v).map_err(|e| IplError::UnsupportedFormat(e.to_string()))
}

/// 供测试使用的临时目录. 每个测试使用不同的 `name`.
#[cfg(test)]
pub(crate) fn scratch_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("ipl-berry-{}-{name}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proc_log::{LogBlock, ProcessingLog};
    use std::path::PathBuf;

    fn sample() -> Volume {
        let data = Array3::from_shape_fn((3, 4, 5), |(z, y, x)| (z * 100 + y * 10 + x) as i16 - 50);
        Volume::from_array(data, [0.082, 0.082, 0.1])
            .unwrap()
            .with_log(ProcessingLog::new("Mu_Scaling 8192\n"))
    }

    #[test]
    fn test_format_from_name() {
        let f = |s: &str| Format::from_name(Path::new(s));
        assert_eq!(f("C0001234.AIM;1"), Some(Format::Aim));
        assert_eq!(f("seg.aim"), Some(Format::Aim));
        assert_eq!(f("scan.nii"), Some(Format::Nifti));
        assert_eq!(f("scan.NII.GZ"), Some(Format::Nifti));
        assert_eq!(f("IM0001.dcm"), Some(Format::Dicom));
        assert_eq!(f("scan.raw"), None);
        assert_eq!(f("scan.aim;x"), None);
    }

    #[test]
    fn test_sniff() {
        let mut aim = V030_MAGIC.to_vec();
        aim.resize(64, 0);
        assert_eq!(Format::sniff(&aim), Some(Format::Aim));

        let mut v020 = Vec::new();
        v020.write_i32::<LittleEndian>(20).unwrap();
        v020.write_i32::<LittleEndian>(140).unwrap();
        assert_eq!(Format::sniff(&v020), Some(Format::Aim));

        assert_eq!(Format::sniff(&[0x1f, 0x8b, 8, 0]), Some(Format::Nifti));

        let mut nii = vec![0u8; 352];
        nii[344..348].copy_from_slice(b"n+1\0");
        assert_eq!(Format::sniff(&nii), Some(Format::Nifti));

        let mut dcm = vec![0u8; 140];
        dcm[128..132].copy_from_slice(b"DICM");
        assert_eq!(Format::sniff(&dcm), Some(Format::Dicom));

        assert_eq!(Format::sniff(b"hello"), None);
    }

    #[test]
    fn test_missing_and_unknown() {
        let dir = scratch_dir("dispatch");
        let missing = dir.join("nope.aim");
        assert!(matches!(read(&missing), Err(IplError::InputNotFound(p)) if p == missing));

        let junk = dir.join("junk.bin");
        std::fs::write(&junk, b"not a volume").unwrap();
        assert!(matches!(read(&junk), Err(IplError::UnsupportedFormat(_))));

        let empty = dir.join("empty");
        std::fs::create_dir_all(&empty).unwrap();
        assert!(matches!(read(&empty), Err(IplError::InputNotFound(_))));
    }

    #[test]
    fn test_dispatch_by_magic() {
        let dir = scratch_dir("magic");
        let vol = sample();
        let named: PathBuf = dir.join("vol.aim");
        write(&vol, &named).unwrap();
        let renamed = dir.join("vol.dat");
        std::fs::rename(&named, &renamed).unwrap();
        let back = read(&renamed).unwrap();
        assert_eq!(back.scalars(), vol.scalars());
        assert_eq!(back.log(), vol.log());
    }

    #[test]
    fn test_round_trip_keeps_pipeline_log() {
        let dir = scratch_dir("log");
        let mut vol = sample().with_lo([2, 3, 4]).unwrap();
        vol.log_mut().append(&LogBlock::new("gauss_lp").param("sigma", 0.8));
        for name in ["vol.aim", "vol.nii", "vol.nii.gz", "series"] {
            let path = dir.join(name);
            write(&vol, &path).unwrap();
            let back = read(&path).unwrap();
            assert_eq!(back.scalars(), vol.scalars(), "{name}");
            assert_eq!(back.log(), vol.log(), "{name}");
            let names: Vec<_> = back.log().stage_names().collect();
            assert_eq!(names, ["gauss_lp"], "{name}");
            for a in 0..3 {
                assert!((back.spacing()[a] - vol.spacing()[a]).abs() < 1e-5, "{name}");
            }
        }
    }

    #[test]
    fn test_scalar_codec() {
        let a = Array3::from_shape_vec((1, 1, 3), vec![-1.5f32, 0.0, 2.25]).unwrap();
        let s = Scalars::from_array(a);
        let mut bytes = Vec::new();
        encode_scalars(&s, &mut bytes);
        assert_eq!(bytes.len(), 12);
        assert_eq!(decode_scalars(&bytes, ScalarType::F32, (1, 1, 3)).unwrap(), s);
        assert!(decode_scalars(&bytes[..11], ScalarType::F32, (1, 1, 3)).is_err());
    }
}
