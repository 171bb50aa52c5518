//! DICOM 单文件与目录序列.
//!
//! 只接受未压缩的小端传输语法. 像素为 8/16 位整数 (PixelData) 或 32 位浮点
//! (FloatPixelData). Rescale slope/intercept 不被应用, 数据保持原生单位.
//! 处理日志原样存放在每个切片的 ImageComments (0020,4000) 中, 读取时取第一个切片的.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use dicom_core::{DataElement, PrimitiveValue, Tag, VR};
use dicom_dictionary_std::{tags, uids};
use dicom_object::{open_file, FileMetaTableBuilder, InMemDicomObject};
use ndarray::{s, Array3};

use crate::data::{Extent, ScalarType, Scalars, Volume};
use crate::error::{invalid, IplError, IplResult};
use crate::proc_log::ProcessingLog;

/// 可接受的传输语法: 隐式与显式 VR 小端.
const LITTLE_ENDIAN_SYNTAXES: [&str; 2] = [
    uids::IMPLICIT_VR_LITTLE_ENDIAN,
    uids::EXPLICIT_VR_LITTLE_ENDIAN,
];

/// 写出的 UID 使用的根 (UUID 派生的 `2.25` 根).
const UID_ROOT: &str = "2.25";

#[inline]
fn dicom_err(path: &Path, e: impl std::fmt::Display) -> IplError {
    IplError::UnsupportedFormat(format!("DICOM {}: {e}", path.display()))
}

/// 一个已解析的切片.
struct Slice {
    path: PathBuf,
    rows: usize,
    cols: usize,
    position: Option<[f64; 3]>,
    instance: i32,
    spacing: [f64; 2],
    thickness: Option<f64>,
    comments: Option<String>,
    pixels: Array3<f64>,
    ty: ScalarType,
}

fn u16_of(obj: &InMemDicomObject, tag: Tag, path: &Path) -> IplResult<u16> {
    obj.element(tag)
        .map_err(|e| dicom_err(path, e))?
        .to_int::<u16>()
        .map_err(|e| dicom_err(path, e))
}

fn floats_of(obj: &InMemDicomObject, tag: Tag) -> Option<Vec<f64>> {
    obj.element(tag).ok()?.to_multi_float64().ok()
}

fn str_of(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    let s = obj.element(tag).ok()?.to_str().ok()?;
    let s = s.trim_end_matches(['\0', ' ']);
    (!s.is_empty()).then(|| s.to_owned())
}

/// 不做修剪地取出文本, 只去掉写入时为凑偶数长度追加的一个 `\0`.
fn text_of(obj: &InMemDicomObject, tag: Tag) -> Option<String> {
    let s = obj.element(tag).ok()?.to_raw_str().ok()?;
    let s = s.strip_suffix('\0').unwrap_or(&s[..]);
    (!s.is_empty()).then(|| s.to_owned())
}

/// 按像素位数与符号解码 PixelData. 8 位有符号为 `i8`, 其余整数为 `i16`.
fn int_pixels(bytes: &[u8], n: usize, bits: u16, signed: bool) -> Option<(Vec<f64>, ScalarType)> {
    let words = |b: &[u8]| -> Vec<[u8; 2]> { b[..n * 2].chunks_exact(2).map(|c| [c[0], c[1]]).collect() };
    let ans = match (bits, signed) {
        (8, true) => (bytes[..n].iter().map(|b| *b as i8 as f64).collect(), ScalarType::I8),
        (8, false) => (bytes[..n].iter().map(|b| *b as f64).collect(), ScalarType::I16),
        (16, true) => (
            words(bytes).into_iter().map(|w| i16::from_le_bytes(w) as f64).collect(),
            ScalarType::I16,
        ),
        (16, false) => (
            words(bytes).into_iter().map(|w| u16::from_le_bytes(w) as f64).collect(),
            ScalarType::I16,
        ),
        _ => return None,
    };
    Some(ans)
}

fn read_slice(path: &Path) -> IplResult<Slice> {
    let obj = open_file(path).map_err(|e| dicom_err(path, e))?;
    let syntax = obj.meta().transfer_syntax().trim_end_matches('\0');
    if !LITTLE_ENDIAN_SYNTAXES.contains(&syntax) {
        return Err(dicom_err(path, format!("transfer syntax {syntax} not supported")));
    }

    let rows = u16_of(&obj, tags::ROWS, path)? as usize;
    let cols = u16_of(&obj, tags::COLUMNS, path)? as usize;
    let bits = u16_of(&obj, tags::BITS_ALLOCATED, path)?;
    let signed = obj
        .element(tags::PIXEL_REPRESENTATION)
        .ok()
        .and_then(|e| e.to_int::<u16>().ok())
        .unwrap_or(0)
        == 1;
    if let Ok(n) = u16_of(&obj, tags::SAMPLES_PER_PIXEL, path) {
        if n != 1 {
            return Err(dicom_err(path, format!("{n} samples per pixel")));
        }
    }

    let float = obj.element(tags::FLOAT_PIXEL_DATA).is_ok();
    let (tag, width) = match (float, bits) {
        (true, _) => (tags::FLOAT_PIXEL_DATA, 4),
        (false, 8 | 16) => (tags::PIXEL_DATA, bits as usize / 8),
        (false, b) => return Err(dicom_err(path, format!("{b}-bit pixels not supported"))),
    };
    let bytes = obj
        .element(tag)
        .map_err(|e| dicom_err(path, e))?
        .to_bytes()
        .map_err(|e| dicom_err(path, e))?;
    let n = rows * cols;
    let need = n * width;
    if bytes.len() < need {
        return Err(dicom_err(path, format!("pixel data holds {} bytes, {need} expected", bytes.len())));
    }
    let (values, ty) = if float {
        let values = bytes[..need]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f64)
            .collect();
        (values, ScalarType::F32)
    } else {
        int_pixels(&bytes, n, bits, signed)
            .ok_or_else(|| dicom_err(path, format!("{bits}-bit pixels not supported")))?
    };
    let pixels =
        Array3::from_shape_vec((1, rows, cols), values).map_err(|e| dicom_err(path, e))?;

    let spacing = match floats_of(&obj, tags::PIXEL_SPACING).as_deref() {
        Some([row, col, ..]) => [*row, *col],
        _ => [1.0, 1.0],
    };
    let position = match floats_of(&obj, tags::IMAGE_POSITION_PATIENT).as_deref() {
        Some([x, y, z, ..]) => Some([*x, *y, *z]),
        _ => None,
    };
    let instance = str_of(&obj, tags::INSTANCE_NUMBER)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(0);

    Ok(Slice {
        path: path.to_path_buf(),
        rows,
        cols,
        position,
        instance,
        spacing,
        thickness: floats_of(&obj, tags::SLICE_THICKNESS).and_then(|v| v.first().copied()),
        comments: text_of(&obj, tags::IMAGE_COMMENTS),
        pixels,
        ty,
    })
}

/// 列出目录下的所有 DICOM 切片. 无法解析的文件被跳过.
fn read_series(dir: &Path) -> IplResult<Vec<Slice>> {
    let mut files: Vec<PathBuf> = fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .collect();
    if files.is_empty() {
        return Err(IplError::InputNotFound(dir.to_path_buf()));
    }
    files.sort();

    let mut slices = Vec::with_capacity(files.len());
    for f in files {
        match read_slice(&f) {
            Ok(s) => slices.push(s),
            Err(e) => log::warn!("skipping {}: {e}", f.display()),
        }
    }
    if slices.is_empty() {
        return Err(IplError::UnsupportedFormat(format!(
            "no DICOM slice in {}",
            dir.display()
        )));
    }
    Ok(slices)
}

/// 读取单个 DICOM 文件或目录序列.
///
/// 序列按 ImagePositionPatient 的 z 排序, 相同时按 InstanceNumber 排序.
/// z 方向间距取相邻切片位置之差, 只有一个切片时取 SliceThickness.
pub fn read(path: &Path) -> IplResult<Volume> {
    let mut slices = if path.is_dir() {
        read_series(path)?
    } else if path.is_file() {
        vec![read_slice(path)?]
    } else {
        return Err(IplError::InputNotFound(path.to_path_buf()));
    };
    slices.sort_by(|a, b| {
        let za = a.position.map_or(0.0, |p| p[2]);
        let zb = b.position.map_or(0.0, |p| p[2]);
        za.total_cmp(&zb).then(a.instance.cmp(&b.instance))
    });

    let first = &slices[0];
    if let Some(bad) = slices.iter().find(|s| (s.rows, s.cols) != (first.rows, first.cols)) {
        return Err(dicom_err(
            &bad.path,
            format!("slice is {}x{}, series is {}x{}", bad.rows, bad.cols, first.rows, first.cols),
        ));
    }

    let z_spacing = match (slices.len(), first.position, slices[1..].first().and_then(|s| s.position)) {
        (n, Some(p0), Some(p1)) if n > 1 && (p1[2] - p0[2]).abs() > 0.0 => (p1[2] - p0[2]).abs(),
        _ => first.thickness.filter(|t| *t > 0.0).unwrap_or(1.0),
    };
    // PixelSpacing 为 (行间距, 列间距), 即 (y, x).
    let spacing = [first.spacing[1], first.spacing[0], z_spacing];
    let origin = first.position.unwrap_or([0.0; 3]);
    let log = first.comments.clone().unwrap_or_default();

    let (nz, ny, nx) = (slices.len(), first.rows, first.cols);
    let mut data = Array3::<f64>::zeros((nz, ny, nx));
    for (z, s) in slices.iter().enumerate() {
        data.slice_mut(s![z..z + 1, .., ..]).assign(&s.pixels);
    }
    let ty = if slices.iter().any(|s| s.ty == ScalarType::F32) {
        ScalarType::F32
    } else if slices.iter().all(|s| s.ty == ScalarType::I8) {
        ScalarType::I8
    } else {
        ScalarType::I16
    };
    let (scalars, clamped) = Scalars::saturating_from(&data, ty);
    if clamped > 0 {
        log::warn!("DICOM {}: clamped {clamped} unsigned voxel(s) to {ty}", path.display());
    }
    log::debug!("DICOM series: {nz} slice(s) of {ny}x{nx}, spacing = {spacing:?}");

    let extent = Extent::with_dims([nx, ny, nz])?;
    Ok(Volume::new(extent, spacing, scalars)
        .map_err(|e| dicom_err(path, e))?
        .with_origin(origin)
        .with_log(ProcessingLog::new(log)))
}

/// 生成一个 `2.25.<十进制数>` 形式的 UID.
fn new_uid(salt: u64) -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("{UID_ROOT}.{}{salt:06}", nanos.max(1))
}

#[inline]
fn ds(values: &[f64]) -> PrimitiveValue {
    PrimitiveValue::Strs(values.iter().map(|v| format!("{v:.6}")).collect())
}

fn put(obj: &mut InMemDicomObject, tag: Tag, vr: VR, value: PrimitiveValue) {
    obj.put(DataElement::new(tag, vr, value));
}

/// 第 `z` 个切片的像素元素 (标签, VR, 值), 以及 BitsAllocated 与是否为整数像素.
fn pixel_element(scalars: &Scalars, z: usize) -> (Tag, VR, PrimitiveValue, u16, bool) {
    match scalars {
        Scalars::I8(a) => {
            let mut bytes: Vec<u8> = a.slice(s![z, .., ..]).iter().map(|v| *v as u8).collect();
            if bytes.len() % 2 == 1 {
                bytes.push(0);
            }
            (tags::PIXEL_DATA, VR::OB, PrimitiveValue::U8(bytes.into()), 8, true)
        }
        Scalars::I16(a) => {
            let words: Vec<u16> = a.slice(s![z, .., ..]).iter().map(|v| *v as u16).collect();
            (tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(words.into()), 16, true)
        }
        Scalars::F32(a) => {
            let floats: Vec<f32> = a.slice(s![z, .., ..]).iter().copied().collect();
            (tags::FLOAT_PIXEL_DATA, VR::OF, PrimitiveValue::F32(floats.into()), 32, false)
        }
    }
}

/// 构造第 `z` 个切片的 DICOM 对象.
fn slice_object(vol: &Volume, z: usize, series_uid: &str, study_uid: &str) -> (InMemDicomObject, String) {
    let [nx, ny, _] = vol.dims();
    let sp = vol.spacing();
    let lo = vol.extent().lo();
    let position = vol.world([lo[0], lo[1], lo[2] + z as i64]);
    let sop_uid = new_uid(z as u64);

    let mut obj = InMemDicomObject::new_empty();
    put(&mut obj, tags::SOP_CLASS_UID, VR::UI, PrimitiveValue::from(uids::CT_IMAGE_STORAGE));
    put(&mut obj, tags::SOP_INSTANCE_UID, VR::UI, PrimitiveValue::from(sop_uid.as_str()));
    put(&mut obj, tags::STUDY_INSTANCE_UID, VR::UI, PrimitiveValue::from(study_uid));
    put(&mut obj, tags::SERIES_INSTANCE_UID, VR::UI, PrimitiveValue::from(series_uid));
    put(&mut obj, tags::MODALITY, VR::CS, PrimitiveValue::from("CT"));
    put(&mut obj, tags::INSTANCE_NUMBER, VR::IS, PrimitiveValue::from((z + 1).to_string()));
    put(&mut obj, tags::IMAGE_POSITION_PATIENT, VR::DS, ds(&position));
    put(&mut obj, tags::PIXEL_SPACING, VR::DS, ds(&[sp[1], sp[0]]));
    put(&mut obj, tags::SLICE_THICKNESS, VR::DS, ds(&[sp[2]]));
    put(&mut obj, tags::SAMPLES_PER_PIXEL, VR::US, PrimitiveValue::from(1u16));
    put(
        &mut obj,
        tags::PHOTOMETRIC_INTERPRETATION,
        VR::CS,
        PrimitiveValue::from("MONOCHROME2"),
    );
    put(&mut obj, tags::ROWS, VR::US, PrimitiveValue::from(ny as u16));
    put(&mut obj, tags::COLUMNS, VR::US, PrimitiveValue::from(nx as u16));
    let (tag, vr, value, bits, integer) = pixel_element(vol.scalars(), z);
    put(&mut obj, tags::BITS_ALLOCATED, VR::US, PrimitiveValue::from(bits));
    if integer {
        put(&mut obj, tags::BITS_STORED, VR::US, PrimitiveValue::from(bits));
        put(&mut obj, tags::HIGH_BIT, VR::US, PrimitiveValue::from(bits - 1));
        put(&mut obj, tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(1u16));
    }
    if !vol.log().is_empty() {
        // 奇数长度时补一个 `\0`, 以免被补成空格.
        let mut text = vol.log().as_str().to_owned();
        if text.len() % 2 == 1 {
            text.push('\0');
        }
        put(&mut obj, tags::IMAGE_COMMENTS, VR::LT, PrimitiveValue::from(text));
    }
    put(&mut obj, tag, vr, value);
    (obj, sop_uid)
}

/// 写出 DICOM.
///
/// `path` 以 `.dcm` 结尾时写为单个文件, 此时体数据只能有一个切片; 否则 `path` 视为目录,
/// 每个 z 切片写为一个文件. 标量类型保持不变: `i8` 与 `i16` 写为 8/16 位有符号 PixelData,
/// `f32` 写为 FloatPixelData.
pub fn write(vol: &Volume, path: &Path) -> IplResult<()> {
    let [nx, ny, nz] = vol.dims();
    if nx > u16::MAX as usize || ny > u16::MAX as usize {
        invalid!("slice of {nx}x{ny} is too large for DICOM");
    }
    let single = path
        .extension()
        .is_some_and(|e| e.eq_ignore_ascii_case("dcm"));
    if single && nz != 1 {
        invalid!("a single DICOM file holds one slice, volume has {nz}");
    }

    if !single {
        fs::create_dir_all(path)?;
    }
    let study_uid = new_uid(0);
    let series_uid = new_uid(1);
    for z in 0..nz {
        let (obj, sop_uid) = slice_object(vol, z, &series_uid, &study_uid);
        let meta = FileMetaTableBuilder::new()
            .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid(sop_uid);
        let file = obj.with_meta(meta).map_err(|e| dicom_err(path, e))?;
        let target = if single {
            path.to_path_buf()
        } else {
            path.join(format!("slice_{z:04}.dcm"))
        };
        file.write_to_file(&target).map_err(|e| dicom_err(&target, e))?;
    }
    log::debug!("DICOM written: {} ({nz} slice(s))", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::scratch_dir;

    fn ramp() -> Volume {
        let data = Array3::from_shape_fn((4, 3, 5), |(z, y, x)| (z as i16 - 2) * 1000 + (y * 10 + x) as i16);
        Volume::from_array(data, [0.25, 0.5, 1.5])
            .unwrap()
            .with_origin([10.0, -20.0, 5.0])
            .with_log(ProcessingLog::new("Mu_Scaling 8192\n!> threshold\n"))
    }

    #[test]
    fn test_series_round_trip() {
        let vol = ramp();
        let dir = scratch_dir("dicom-series");
        let series = dir.join("series");
        write(&vol, &series).unwrap();
        assert_eq!(fs::read_dir(&series).unwrap().count(), 4);

        let back = read(&series).unwrap();
        assert_eq!(back.scalar_type(), ScalarType::I16);
        assert_eq!(back.scalars(), vol.scalars());
        assert_eq!(back.log(), vol.log());
        for a in 0..3 {
            assert!((back.spacing()[a] - vol.spacing()[a]).abs() < 1e-6);
            assert!((back.origin()[a] - vol.origin()[a]).abs() < 1e-6);
        }
    }

    #[test]
    fn test_single_float_file() {
        let data = Array3::from_shape_vec((1, 1, 3), vec![-1e6f32, 12.4, 0.125]).unwrap();
        let vol = Volume::from_array(data, [1.0, 1.0, 2.0]).unwrap();
        let dir = scratch_dir("dicom-single");
        let path = dir.join("one.dcm");
        write(&vol, &path).unwrap();
        let back = read(&path).unwrap();
        assert_eq!(back.scalar_type(), ScalarType::F32);
        assert_eq!(back.scalars(), vol.scalars());
        assert_eq!(back.spacing()[2], 2.0);
        assert!(back.log().is_empty());

        assert!(write(&ramp(), &dir.join("many.dcm")).is_err());
    }

    #[test]
    fn test_mask_round_trip() {
        let e = Extent::with_dims([3, 3, 2]).unwrap();
        let mask = Volume::mask_from_fn(e, [0.5; 3], |[x, y, z]| x + y + z > 2)
            .unwrap()
            .with_log(ProcessingLog::new("!> threshold\n  value   127  \n"));
        let dir = scratch_dir("dicom-mask");
        write(&mask, &dir.join("mask")).unwrap();
        let back = read(&dir.join("mask")).unwrap();
        assert_eq!(back.scalar_type(), ScalarType::I8);
        assert!(back.mask().is_ok());
        assert_eq!(back.scalars(), mask.scalars());
        assert_eq!(back.log(), mask.log());
    }

    #[test]
    fn test_log_keeps_trailing_spaces() {
        for text in ["Mu_Scaling 8192 ", "Mu_Scaling 8192  ", "a\n \n"] {
            let vol = ramp().with_log(ProcessingLog::new(text));
            let path = scratch_dir("dicom-log").join("log");
            write(&vol, &path).unwrap();
            assert_eq!(read(&path).unwrap().log().as_str(), text);
        }
    }

    #[test]
    fn test_unsigned_words_are_clamped() {
        let data = Array3::from_shape_vec((1, 1, 2), vec![0i16, 5]).unwrap();
        let vol = Volume::from_array(data, [1.0; 3]).unwrap();
        let (mut obj, sop_uid) = slice_object(&vol, 0, "2.25.1", "2.25.2");
        put(&mut obj, tags::PIXEL_REPRESENTATION, VR::US, PrimitiveValue::from(0u16));
        put(&mut obj, tags::PIXEL_DATA, VR::OW, PrimitiveValue::U16(vec![40000u16, 5].into()));
        let meta = FileMetaTableBuilder::new()
            .transfer_syntax(uids::EXPLICIT_VR_LITTLE_ENDIAN)
            .media_storage_sop_class_uid(uids::CT_IMAGE_STORAGE)
            .media_storage_sop_instance_uid(sop_uid);
        let path = scratch_dir("dicom-unsigned").join("u16.dcm");
        obj.with_meta(meta).unwrap().write_to_file(&path).unwrap();

        let back = read(&path).unwrap();
        assert_eq!(back.data::<i16>().unwrap().as_slice().unwrap(), &[i16::MAX, 5]);
    }

    #[test]
    fn test_unreadable_files_are_skipped() {
        let dir = scratch_dir("dicom-skip");
        let series = dir.join("series");
        write(&ramp(), &series).unwrap();
        fs::write(series.join("README.txt"), "not dicom").unwrap();
        assert_eq!(read(&series).unwrap().dims(), [5, 3, 4]);

        let junk = dir.join("junk");
        fs::create_dir_all(&junk).unwrap();
        fs::write(junk.join("a.txt"), "x").unwrap();
        assert!(matches!(read(&junk), Err(IplError::UnsupportedFormat(_))));
    }
}
