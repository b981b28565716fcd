use tensorflow::{ Tensor, Session, SessionOptions, Graph, SessionRunArgs, ImportGraphDefOptions, TensorType };
use image::{ DynamicImage, GenericImageView, GrayImage, imageops::FilterType };
use imageproc::{ filter, contrast };

use std::fs;
use std::path::Path;

use super::TextReader;
use crate::detector::TextCandidate;
use crate::error::LprError;
use crate::utils;

// CHARS for Chinese license plate, the alphabet of ocr_plate_all_gru
const CHARS: [&str; 83] = ["京", "沪", "津", "渝", "冀", "晋", "蒙", "辽", "吉", "黑", "苏", "浙", "皖", "闽", "赣", "鲁", "豫", "鄂", "湘", "粤", "桂",
             "琼", "川", "贵", "云", "藏", "陕", "甘", "青", "宁", "新", "0", "1", "2", "3", "4", "5", "6", "7", "8", "9", "A",
             "B", "C", "D", "E", "F", "G", "H", "J", "K", "L", "M", "N", "P", "Q", "R", "S", "T", "U", "V", "W", "X",
             "Y", "Z","港","学","使","警","澳","挂","军","北","南","广","沈","兰","成","济","海","民","航","空"
             ];
// timesteps x classes, the last class is the ctc blank
const OCR_SHAPE: [usize; 2] = [18, 84];
const OCR_INPUT: (u32, u32) = (48, 164);
const FINE_MAPPING_INPUT: (u32, u32) = (66, 16);

/// x, y, width, height in pixels
type PlateBox = [u32; 4];

/// Plate reader running three frozen graphs: plate detection, horizontal fine mapping
/// and a ctc ocr head.
pub struct TfReader {
    detection: FrozenGraph,
    ocr: FrozenGraph,
    fine_mapping: FrozenGraph,
    score_needed: f32,
}

struct FrozenGraph {
    graph: Graph,
    session: Session,
}

impl FrozenGraph {

    fn load(pb_file: impl AsRef<Path>) -> Result<Self, LprError> {
        let pb = fs::read(pb_file)?;
        // import graph def
        let mut graph = Graph::new();
        let graph_def_options = ImportGraphDefOptions::new();
        graph.import_graph_def(&pb, &graph_def_options)?;
        // new session
        let session_option = SessionOptions::new();
        let session = Session::new(&session_option, &graph)?;
        Ok(Self { graph, session })
    }

    fn run<T: TensorType>(&self, input_name: &str, input: &Tensor<T>, output_names: &[&str]) -> Result<Vec<Tensor<f32>>, LprError> {
        let graph = &self.graph;
        let mut args = SessionRunArgs::new();
        args.add_feed(&graph.operation_by_name_required(input_name)?, 0, input);
        let tokens = output_names.iter()
            .map(|name| Ok(args.request_fetch(&graph.operation_by_name_required(name)?, 0)))
            .collect::<Result<Vec<_>, LprError>>()?;
        self.session.run(&mut args)?;
        tokens.into_iter()
            .map(|token| Ok(args.fetch::<f32>(token)?))
            .collect()
    }
}

impl TfReader {

    pub fn new(detection_pb: impl AsRef<Path>, ocr_pb: impl AsRef<Path>, fine_mapping_pb: impl AsRef<Path>, score_needed: f32) -> Result<Self, LprError> {
        let detection = FrozenGraph::load(detection_pb)?;
        let ocr = FrozenGraph::load(ocr_pb)?;
        let fine_mapping = FrozenGraph::load(fine_mapping_pb)?;
        Ok(Self { detection, ocr, fine_mapping, score_needed })
    }

    /// get boxes and scores
    /// boxes scoring at or below score_needed are dropped
    fn get_boxes_and_scores(&self, img: &DynamicImage) -> Result<Vec<(PlateBox, f32)>, LprError> {
        let (width, height) = img.dimensions();
        let img_data = img.to_rgb8().into_raw();
        let img_tensor = Tensor::new(&[1, height as u64, width as u64, 3]).with_values(&img_data)?;

        // box ymin xmin ymax xmax normalize 1
        let mut outputs = self.detection.run("image_tensor", &img_tensor, &["detection_boxes", "detection_scores"])?;
        let scores = outputs.pop().ok_or_else(|| LprError::backend("detection graph returned no scores"))?;
        let boxes = outputs.pop().ok_or_else(|| LprError::backend("detection graph returned no boxes"))?;

        let detect_res = boxes.chunks(4).zip(scores.iter())
            .filter(|(_, score)| **score > self.score_needed)
            .filter_map(|(v, score)| {
                let ymin = (v[0].clamp(0.0, 1.0)*(height as f32)) as u32;
                let xmin = (v[1].clamp(0.0, 1.0)*(width as f32)) as u32;
                let ymax = (v[2].clamp(0.0, 1.0)*(height as f32)) as u32;
                let xmax = (v[3].clamp(0.0, 1.0)*(width as f32)) as u32;
                if xmax <= xmin || ymax <= ymin {
                    return None;
                }
                Some(([xmin, ymin, xmax - xmin, ymax - ymin], *score))
            }).collect();
        Ok(detect_res)
    }

    /// Tighten the plate crop left and right, moving `plate_box` along with it.
    fn fine_mapping_horizontal(&self, plate: &DynamicImage, plate_box: &mut PlateBox) -> Result<DynamicImage, LprError> {
        let (in_w, in_h) = FINE_MAPPING_INPUT;
        let resized = plate.resize_exact(in_w, in_h, FilterType::Nearest).to_rgb8();
        let resized: Vec<f32> = utils::to_bgr_vec(&resized).into_iter().map(|v| v as f32/255.0).collect();
        let tensor = Tensor::new(&[1, in_h as u64, in_w as u64, 3]).with_values(&resized)?;

        let res = self.fine_mapping.run("input_1", &tensor, &["relu4/Relu"])?;
        let res = res.first().ok_or_else(|| LprError::backend("fine mapping graph returned nothing"))?;
        if res.len() < 2 {
            return Err(LprError::backend("fine mapping graph returned a short tensor"));
        }
        let (width, height) = plate.dimensions();
        let Some((left, right)) = fine_mapping_bounds(res[0], res[1], width) else {
            return Ok(plate.clone());
        };

        plate_box[0] += left;
        plate_box[2] = right - left;
        Ok(DynamicImage::ImageRgba8(plate.view(left, 0, right - left, height).to_image()))
    }

    fn get_ocr_result(&self, plate: &DynamicImage) -> Result<(String, f32), LprError> {
        let img = utils::equalize_hist_in_gray(plate);

        // transpose
        let img = utils::transpose(&DynamicImage::ImageLuma8(img));
        let (in_w, in_h) = OCR_INPUT;
        let img = img.resize_exact(in_w, in_h, FilterType::Nearest);

        let img = img.to_luma8();
        let mut img = filter::gaussian_blur_f32(&img, 1.4);
        contrast::equalize_histogram_mut(&mut img);
        let img = DynamicImage::ImageLuma8(img).to_rgb8();
        let img: Vec<f32> = utils::to_bgr_vec(&img).into_iter().map(|v| v as f32).collect();
        let tensor_img = Tensor::new(&[1, in_h as u64, in_w as u64, 3]).with_values(&img)?;

        let res = self.ocr.run("input_1", &tensor_img, &["dense_2/truediv"])?;
        let res = res.first().ok_or_else(|| LprError::backend("ocr graph returned nothing"))?;
        if res.len() < OCR_SHAPE[0]*OCR_SHAPE[1] {
            return Err(LprError::backend("ocr graph returned a short tensor"));
        }
        Ok(ctc_greedy_decode(res, OCR_SHAPE))
    }
}

impl TextReader for TfReader {
    fn name(&self) -> &'static str {
        "tensorflow"
    }

    fn read_text(&self, img: &GrayImage) -> Result<Vec<TextCandidate>, LprError> {
        // the detection graph expects three channels
        let img = DynamicImage::ImageRgb8(DynamicImage::ImageLuma8(img.clone()).to_rgb8());

        let mut candidates = Vec::new();
        for (mut plate_box, score) in self.get_boxes_and_scores(&img)? {
            let [x, y, width, height] = plate_box;
            let plate = DynamicImage::ImageRgba8(img.view(x, y, width, height).to_image());
            let plate = self.fine_mapping_horizontal(&plate, &mut plate_box)?;
            let (text, confidence) = self.get_ocr_result(&plate)?;
            log::debug!("plate box {:?} scored {:.3}, read {:?} at {:.3}", plate_box, score, text, confidence);

            let [x, y, width, height] = plate_box;
            let (x0, y0, x1, y1) = (x as f32, y as f32, (x + width) as f32, (y + height) as f32);
            candidates.push(TextCandidate {
                polygon: vec![(x0, y0), (x1, y0), (x1, y1), (x0, y1)],
                text,
                confidence,
            });
        }
        Ok(candidates)
    }
}

/// Column range kept by fine mapping, padded 3px left and 2px right and clamped to the
/// plate. `None` when the graph's edges leave nothing to keep.
fn fine_mapping_bounds(left_edge: f32, right_edge: f32, width: u32) -> Option<(u32, u32)> {
    let last = width.checked_sub(1)?;
    let left = ((left_edge*width as f32) as u32).saturating_sub(3);
    let right = ((right_edge*width as f32) as u32).saturating_add(2).min(last);
    (right > left).then_some((left, right))
}

/// Greedy ctc decode: best class per timestep, repeats collapsed, blanks dropped.
/// Confidence is the mean probability of the emitted characters.
fn ctc_greedy_decode(ocr_res: &[f32], shape: [usize; 2]) -> (String, f32) {
    let argmax = utils::argmax_in_axis0(&ocr_res[..shape[0]*shape[1]], &shape);
    let mut text = String::new();
    let mut total = 0.0;
    let mut count = 0;
    let mut prev = None;
    for (i, v) in argmax.iter().enumerate() {
        if *v < CHARS.len() && prev != Some(*v) {
            text.push_str(CHARS[*v]);
            total += ocr_res[i*shape[1] + v];
            count += 1;
        }
        prev = Some(*v);
    }
    let confidence = if count == 0 { 0.0 } else { total/count as f32 };
    (text, confidence)
}
