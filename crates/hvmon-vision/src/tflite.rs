use anyhow::{Context, Result};
use hvmon_proto::Detection;
use image::{imageops::FilterType, RgbImage};
use std::{ffi::CString, os::raw::{c_char, c_int, c_void}, ptr};
use tracing::info;

use crate::detector::{Delegate, Detector, DetectorConfig, DetectorFactory};
use crate::ssd::{decode_ssd_outputs, load_labels, SsdOutputs};

#[repr(C)]
struct TfLiteModel;
#[repr(C)]
struct TfLiteInterpreterOptions;
#[repr(C)]
struct TfLiteInterpreter;
#[repr(C)]
struct TfLiteTensor;
#[repr(C)]
struct TfLiteDelegate;

const K_TFLITE_FLOAT32: c_int = 1;
const K_TFLITE_UINT8: c_int = 3;

extern "C" {
    fn TfLiteModelCreateFromFile(model_path: *const c_char) -> *mut TfLiteModel;
    fn TfLiteModelDelete(model: *mut TfLiteModel);

    fn TfLiteInterpreterOptionsCreate() -> *mut TfLiteInterpreterOptions;
    fn TfLiteInterpreterOptionsDelete(options: *mut TfLiteInterpreterOptions);
    fn TfLiteInterpreterOptionsSetNumThreads(options: *mut TfLiteInterpreterOptions, num_threads: c_int);
    #[cfg(feature = "tflite-gpu")]
    fn TfLiteInterpreterOptionsAddDelegate(options: *mut TfLiteInterpreterOptions, delegate: *mut TfLiteDelegate);

    fn TfLiteInterpreterCreate(model: *const TfLiteModel, options: *const TfLiteInterpreterOptions) -> *mut TfLiteInterpreter;
    fn TfLiteInterpreterDelete(interpreter: *mut TfLiteInterpreter);

    fn TfLiteInterpreterAllocateTensors(interpreter: *mut TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterInvoke(interpreter: *mut TfLiteInterpreter) -> c_int;

    fn TfLiteInterpreterGetInputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *mut TfLiteTensor;
    fn TfLiteInterpreterGetOutputTensorCount(interpreter: *const TfLiteInterpreter) -> c_int;
    fn TfLiteInterpreterGetOutputTensor(interpreter: *mut TfLiteInterpreter, index: c_int) -> *const TfLiteTensor;

    fn TfLiteTensorType(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorData(tensor: *const TfLiteTensor) -> *mut c_void;
    fn TfLiteTensorByteSize(tensor: *const TfLiteTensor) -> usize;

    fn TfLiteTensorNumDims(tensor: *const TfLiteTensor) -> c_int;
    fn TfLiteTensorDim(tensor: *const TfLiteTensor, dim_index: c_int) -> c_int;
}

#[cfg(feature = "tflite-gpu")]
extern "C" {
    fn TfLiteGpuDelegateV2Create(options: *const c_void) -> *mut TfLiteDelegate;
    fn TfLiteGpuDelegateV2Delete(delegate: *mut TfLiteDelegate);
}

/// SSD detector on the TensorFlow Lite C API.
pub struct TfliteDetector {
    model: *mut TfLiteModel,
    opts: *mut TfLiteInterpreterOptions,
    interp: *mut TfLiteInterpreter,
    #[cfg_attr(not(feature = "tflite-gpu"), allow(dead_code))]
    delegate: *mut TfLiteDelegate,
    labels: Vec<String>,
    threshold: f32,
    max_results: usize,
    in_w: u32,
    in_h: u32,
    in_type: c_int,
}

// The raw handles are only touched from the thread that owns the detector.
unsafe impl Send for TfliteDetector {}

impl TfliteDetector {
    pub fn new(cfg: &DetectorConfig) -> Result<Self> {
        let labels = match &cfg.labels {
            Some(path) => load_labels(path)?,
            None => Vec::new(),
        };

        let cpath = CString::new(cfg.model.as_str())?;
        let model = unsafe { TfLiteModelCreateFromFile(cpath.as_ptr()) };
        anyhow::ensure!(!model.is_null(), "failed to load tflite model: {}", cfg.model);

        // From here on partially built handles are freed by Drop.
        let mut det = Self {
            model,
            opts: ptr::null_mut(),
            interp: ptr::null_mut(),
            delegate: ptr::null_mut(),
            labels,
            threshold: cfg.score_threshold,
            max_results: cfg.max_results as usize,
            in_w: 0,
            in_h: 0,
            in_type: K_TFLITE_UINT8,
        };

        det.opts = unsafe { TfLiteInterpreterOptionsCreate() };
        anyhow::ensure!(!det.opts.is_null(), "failed to create tflite options");
        unsafe { TfLiteInterpreterOptionsSetNumThreads(det.opts, cfg.num_threads as c_int) };

        if cfg.delegate == Delegate::Gpu {
            det.attach_gpu()?;
        }

        det.interp = unsafe { TfLiteInterpreterCreate(det.model, det.opts) };
        anyhow::ensure!(!det.interp.is_null(), "failed to create tflite interpreter");

        let rc = unsafe { TfLiteInterpreterAllocateTensors(det.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterAllocateTensors failed");

        let input = unsafe { TfLiteInterpreterGetInputTensor(det.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let dims = tensor_dims(input);
        let (h, w) = match dims.as_slice() {
            [1, h, w, 3] => (*h as u32, *w as u32),
            other => anyhow::bail!("unexpected input dims {:?}; expected [1, H, W, 3]", other),
        };
        det.in_w = w;
        det.in_h = h;
        det.in_type = unsafe { TfLiteTensorType(input) };
        anyhow::ensure!(
            det.in_type == K_TFLITE_UINT8 || det.in_type == K_TFLITE_FLOAT32,
            "unsupported input tensor type {}",
            det.in_type
        );

        let outputs = unsafe { TfLiteInterpreterGetOutputTensorCount(det.interp) };
        anyhow::ensure!(outputs >= 4, "expected 4 SSD output tensors, model has {}", outputs);

        info!("vision: loaded TFLite model {} ({}x{}, delegate {})", cfg.model, w, h, cfg.delegate);
        Ok(det)
    }

    #[cfg(feature = "tflite-gpu")]
    fn attach_gpu(&mut self) -> Result<()> {
        self.delegate = unsafe { TfLiteGpuDelegateV2Create(ptr::null()) };
        anyhow::ensure!(!self.delegate.is_null(), "failed to create GPU delegate");
        unsafe { TfLiteInterpreterOptionsAddDelegate(self.opts, self.delegate) };
        Ok(())
    }

    #[cfg(not(feature = "tflite-gpu"))]
    fn attach_gpu(&mut self) -> Result<()> {
        anyhow::bail!("delegate=gpu but binary not built with --features tflite-gpu")
    }

    pub fn inspect(&mut self) -> Result<String> {
        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let mut s = format!(
            "TFLite inspect:\n- input[0] dims={:?} type={} bytes={}\n",
            tensor_dims(input),
            unsafe { TfLiteTensorType(input) },
            unsafe { TfLiteTensorByteSize(input) }
        );
        let count = unsafe { TfLiteInterpreterGetOutputTensorCount(self.interp) };
        for i in 0..count {
            let t = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, i) };
            anyhow::ensure!(!t.is_null(), "no output tensor {}", i);
            s.push_str(&format!(
                "- output[{}] dims={:?} bytes={}\n",
                i,
                tensor_dims(t),
                unsafe { TfLiteTensorByteSize(t) }
            ));
        }
        s.push_str(&format!("- labels: {}\n", self.labels.len()));
        Ok(s)
    }

    fn fill_input(&mut self, image: &RgbImage) -> Result<()> {
        let resized = image::imageops::resize(image, self.in_w, self.in_h, FilterType::Triangle);

        let input = unsafe { TfLiteInterpreterGetInputTensor(self.interp, 0) };
        anyhow::ensure!(!input.is_null(), "no input tensor");
        let in_bytes = unsafe { TfLiteTensorByteSize(input) };
        let in_ptr = unsafe { TfLiteTensorData(input) };
        anyhow::ensure!(!in_ptr.is_null(), "null input tensor data");

        let px = resized.as_raw();
        if self.in_type == K_TFLITE_UINT8 {
            anyhow::ensure!(in_bytes >= px.len(), "input tensor too small: {} < {}", in_bytes, px.len());
            unsafe { ptr::copy_nonoverlapping(px.as_ptr(), in_ptr as *mut u8, px.len()) };
        } else {
            let need = px.len() * std::mem::size_of::<f32>();
            anyhow::ensure!(in_bytes >= need, "input tensor too small: {} < {}", in_bytes, need);
            let dst = unsafe { std::slice::from_raw_parts_mut(in_ptr as *mut f32, px.len()) };
            for (d, &v) in dst.iter_mut().zip(px.iter()) {
                *d = (v as f32 - 127.5) / 127.5;
            }
        }
        Ok(())
    }

    fn output_f32(&mut self, index: c_int) -> Result<&[f32]> {
        let t = unsafe { TfLiteInterpreterGetOutputTensor(self.interp, index) };
        anyhow::ensure!(!t.is_null(), "no output tensor {}", index);
        let data = unsafe { TfLiteTensorData(t) as *const f32 };
        anyhow::ensure!(!data.is_null(), "null output tensor {} data", index);
        let len = unsafe { TfLiteTensorByteSize(t) } / std::mem::size_of::<f32>();
        Ok(unsafe { std::slice::from_raw_parts(data, len) })
    }
}

impl Detector for TfliteDetector {
    fn name(&self) -> &'static str {
        "tflite"
    }

    fn detect(&mut self, image: &RgbImage) -> Result<Vec<Detection>> {
        self.fill_input(image).context("fill input tensor")?;

        let rc = unsafe { TfLiteInterpreterInvoke(self.interp) };
        anyhow::ensure!(rc == 0, "TfLiteInterpreterInvoke failed");

        let boxes = self.output_f32(0)?.to_vec();
        let classes = self.output_f32(1)?.to_vec();
        let scores = self.output_f32(2)?.to_vec();
        let count = self.output_f32(3)?.first().copied().unwrap_or(0.0).max(0.0) as usize;

        let out = SsdOutputs { boxes: &boxes, classes: &classes, scores: &scores, count };
        Ok(decode_ssd_outputs(out, &self.labels, self.threshold, self.max_results, image.width(), image.height()))
    }
}

fn tensor_dims(t: *const TfLiteTensor) -> Vec<i32> {
    unsafe {
        let nd = TfLiteTensorNumDims(t);
        let mut v = Vec::with_capacity(nd.max(0) as usize);
        for i in 0..nd { v.push(TfLiteTensorDim(t, i)); }
        v
    }
}

impl Drop for TfliteDetector {
    fn drop(&mut self) {
        unsafe {
            if !self.interp.is_null() { TfLiteInterpreterDelete(self.interp); }
            if !self.opts.is_null() { TfLiteInterpreterOptionsDelete(self.opts); }
            if !self.model.is_null() { TfLiteModelDelete(self.model); }
        }
        #[cfg(feature = "tflite-gpu")]
        unsafe {
            if !self.delegate.is_null() { TfLiteGpuDelegateV2Delete(self.delegate); }
        }
    }
}

/// Builds [`TfliteDetector`]s from the detector config.
#[derive(Debug, Default, Clone, Copy)]
pub struct TfliteFactory;

impl DetectorFactory for TfliteFactory {
    fn create(&self, cfg: &DetectorConfig) -> Result<Box<dyn Detector>> {
        Ok(Box::new(TfliteDetector::new(cfg)?))
    }
}
