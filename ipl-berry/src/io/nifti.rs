//! NIfTI-1 格式 (`.nii`, `.nii.gz`).
//!
//! 数据类型映射: int8 读为 `i8`, uint8 与 int16 读为 `i16`, 其余读为 `f32`.
//! 只保留前三维; 多余的维度必须是长度为 1 的.
//!
//! NIfTI 文件头没有存放处理日志的位置, 日志写在同名的 `<文件名>.log` 旁挂文件中.

use std::ffi::OsString;
use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use ndarray::{Array3, ArrayD, Axis, Ix3};
use nifti::volume::ndarray::IntoNdArray;
use nifti::writer::WriterOptions;
use nifti::{InMemNiftiObject, NiftiHeader, NiftiObject};

use crate::data::{map_scalars, Extent, Scalars, Volume};
use crate::error::{IplError, IplResult};
use crate::proc_log::ProcessingLog;

/// NIfTI datatype 码.
mod datatype {
    pub const UINT8: i16 = 2;
    pub const INT16: i16 = 4;
    pub const INT8: i16 = 256;
}

/// `xyzt_units` 中的毫米.
const UNITS_MM: u8 = 2;

#[inline]
fn nifti_err(e: nifti::NiftiError) -> IplError {
    IplError::UnsupportedFormat(format!("NIfTI: {e}"))
}

/// `path` 对应的日志旁挂文件路径.
pub fn sidecar(path: &Path) -> PathBuf {
    let mut s = OsString::from(path.as_os_str());
    s.push(".log");
    PathBuf::from(s)
}

/// `[x, y, z, 1, ...]` 数组转为 `(z, y, x)`.
fn to_zyx<T: Clone>(mut a: ArrayD<T>) -> IplResult<Array3<T>> {
    while a.ndim() > 3 && a.shape()[a.ndim() - 1] == 1 {
        let last = Axis(a.ndim() - 1);
        a = a.index_axis_move(last, 0);
    }
    while a.ndim() < 3 {
        let next = Axis(a.ndim());
        a.insert_axis_inplace(next);
    }
    let shape = a.shape().to_vec();
    let a = a.into_dimensionality::<Ix3>().map_err(|_| {
        IplError::UnsupportedFormat(format!("NIfTI volume of shape {shape:?} is not 3D"))
    })?;

    // [x, y, z] -> [z, y, x].
    Ok(a.permuted_axes([2, 1, 0]).as_standard_layout().into_owned())
}

/// 按文件头中的 qform 或 sform 获取第一个体素的世界坐标. 两者都未设置时为 0.
fn origin_of(h: &NiftiHeader) -> [f64; 3] {
    if h.qform_code > 0 {
        [h.quatern_x, h.quatern_y, h.quatern_z].map(f64::from)
    } else if h.sform_code > 0 {
        [h.srow_x[3], h.srow_y[3], h.srow_z[3]].map(f64::from)
    } else {
        [0.0; 3]
    }
}

/// 解析内存中的 NIfTI 文件 (可以是 gzip 压缩的). 不读取日志.
pub fn decode(bytes: &[u8]) -> IplResult<Volume> {
    let obj = if bytes.starts_with(&[0x1f, 0x8b]) {
        InMemNiftiObject::from_reader(GzDecoder::new(Cursor::new(bytes)))
    } else {
        InMemNiftiObject::from_reader(Cursor::new(bytes))
    }
    .map_err(nifti_err)?;
    let header = obj.header().clone();
    log::debug!(
        "NIfTI header: dim = {:?}, datatype = {}, pixdim = {:?}",
        header.dim,
        header.datatype,
        header.pixdim
    );

    let volume = obj.into_volume();
    let scalars = match header.datatype {
        datatype::INT8 => Scalars::from_array(to_zyx(volume.into_ndarray::<i8>().map_err(nifti_err)?)?),
        datatype::UINT8 | datatype::INT16 => {
            Scalars::from_array(to_zyx(volume.into_ndarray::<i16>().map_err(nifti_err)?)?)
        }
        _ => Scalars::from_array(to_zyx(volume.into_ndarray::<f32>().map_err(nifti_err)?)?),
    };

    let spacing = [1, 2, 3].map(|i| {
        let s = header.pixdim[i].abs() as f64;
        if s.is_finite() && s > 0.0 {
            s
        } else {
            log::warn!("NIfTI pixdim[{i}] = {} is not a spacing, using 1", header.pixdim[i]);
            1.0
        }
    });
    let (nz, ny, nx) = scalars.shape();
    let extent = Extent::with_dims([nx, ny, nz])?;
    Ok(Volume::new(extent, spacing, scalars)
        .map_err(|e| IplError::UnsupportedFormat(format!("NIfTI: {e}")))?
        .with_origin(origin_of(&header)))
}

/// 读取 NIfTI 文件, 并在旁挂日志存在时一并读取.
pub fn read(path: &Path) -> IplResult<Volume> {
    if !path.is_file() {
        return Err(IplError::InputNotFound(path.to_path_buf()));
    }
    let vol = decode(&fs::read(path)?)?;
    let side = sidecar(path);
    if side.is_file() {
        let text = fs::read_to_string(&side)?;
        log::debug!("NIfTI log sidecar: {} ({} bytes)", side.display(), text.len());
        return Ok(vol.with_log(ProcessingLog::new(text)));
    }
    Ok(vol)
}

/// 写出 NIfTI 文件. 文件名以 `.gz` 结尾时压缩.
///
/// 原点取范围起点的世界坐标, 因此读回的体数据范围从 0 开始而世界坐标不变.
/// 日志非空时写入旁挂文件, 为空时删除过期的旁挂文件.
pub fn write(vol: &Volume, path: &Path) -> IplResult<()> {
    let sp = vol.spacing().map(|s| s as f32);
    let o = vol.world(vol.extent().lo()).map(|v| v as f32);
    let header = NiftiHeader {
        pixdim: [1.0, sp[0], sp[1], sp[2], 1.0, 1.0, 1.0, 1.0],
        xyzt_units: UNITS_MM,
        qform_code: 1,
        sform_code: 1,
        quatern_b: 0.0,
        quatern_c: 0.0,
        quatern_d: 0.0,
        quatern_x: o[0],
        quatern_y: o[1],
        quatern_z: o[2],
        srow_x: [sp[0], 0.0, 0.0, o[0]],
        srow_y: [0.0, sp[1], 0.0, o[1]],
        srow_z: [0.0, 0.0, sp[2], o[2]],
        ..NiftiHeader::default()
    };

    // (z, y, x) -> [x, y, z].
    map_scalars!(vol.scalars(), a => {
        WriterOptions::new(path)
            .reference_header(&header)
            .write_nifti(&a.view().reversed_axes())
    })
    .map_err(nifti_err)?;

    let side = sidecar(path);
    if vol.log().is_empty() {
        if side.is_file() {
            fs::remove_file(&side)?;
        }
    } else {
        fs::write(&side, vol.log().as_str())?;
    }
    log::debug!("NIfTI written: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ScalarType;
    use crate::io::scratch_dir;
    use ndarray::{Array, IxDyn};

    #[test]
    fn test_to_zyx() {
        let a = Array::from_shape_fn(IxDyn(&[4, 3, 2, 1]), |i| (i[0] + 10 * i[1] + 100 * i[2]) as i16);
        let b = to_zyx(a).unwrap();
        assert_eq!(b.dim(), (2, 3, 4));
        assert_eq!(b[(1, 2, 3)], 123);
        assert!(b.is_standard_layout());

        let flat = Array::from_elem(IxDyn(&[5, 4]), 1.0f32);
        assert_eq!(to_zyx(flat).unwrap().dim(), (1, 4, 5));

        let series = Array::from_elem(IxDyn(&[2, 2, 2, 3]), 0u8);
        assert!(to_zyx(series).is_err());
    }

    #[test]
    fn test_round_trip_f32_with_origin() {
        let data = Array3::from_shape_fn((3, 2, 4), |(z, y, x)| x as f32 * 0.5 - y as f32 + z as f32 * 10.0);
        let vol = Volume::from_array(data, [0.5, 0.25, 2.0])
            .unwrap()
            .with_origin([-10.0, 4.0, 1.5])
            .with_lo([2, 0, 1])
            .unwrap();

        let dir = scratch_dir("nifti");
        for name in ["a.nii", "a.nii.gz"] {
            let path = dir.join(name);
            write(&vol, &path).unwrap();
            assert!(!sidecar(&path).exists());
            let back = read(&path).unwrap();
            assert_eq!(back.scalar_type(), ScalarType::F32);
            assert_eq!(back.scalars(), vol.scalars());
            assert_eq!(back.extent().lo(), [0, 0, 0]);
            assert_eq!(back.spacing(), [0.5, 0.25, 2.0]);
            let w = back.world([0, 0, 0]);
            let expect = vol.world([2, 0, 1]);
            for a in 0..3 {
                assert!((w[a] - expect[a]).abs() < 1e-5);
            }
        }
    }

    #[test]
    fn test_datatype_mapping() {
        let dir = scratch_dir("nifti-types");
        let path = dir.join("u8.nii");
        WriterOptions::new(&path)
            .write_nifti(&Array3::<u8>::from_elem((2, 2, 2), 200))
            .unwrap();
        let back = read(&path).unwrap();
        assert_eq!(back.scalar_type(), ScalarType::I16);
        assert_eq!(back.data::<i16>().unwrap()[(1, 1, 1)], 200);

        let mask = Array3::from_shape_fn((2, 3, 3), |(z, _, x)| if x == z { 127i8 } else { 0 });
        let vol = Volume::from_array(mask, [1.0; 3])
            .unwrap()
            .with_log(ProcessingLog::new("!> threshold\n"));
        let path = dir.join("mask.nii.gz");
        write(&vol, &path).unwrap();
        assert!(sidecar(&path).ends_with("mask.nii.gz.log"));
        let back = read(&path).unwrap();
        assert_eq!(back.scalar_type(), ScalarType::I8);
        assert_eq!(back.scalars(), vol.scalars());
        assert_eq!(back.log(), vol.log());
    }
}
