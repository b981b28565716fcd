use image::{ DynamicImage, GenericImage, GrayImage, RgbImage };


// tensor rows are laid out timestep first, one score per class
pub fn argmax_in_axis0(input: &[f32], shape: &[usize]) -> Vec<usize> {
    input.chunks(shape[1]).map(|v: &[f32]| {
        let mut max = f32::NEG_INFINITY;
        let mut index = 0;
        v.iter().enumerate().for_each(|(i, v_in_v)| {
            if *v_in_v >= max {
                max = *v_in_v;
                index = i;
            }
        });
        index
    }).collect()
}

/// Swap rows and columns.
pub fn transpose(input: &DynamicImage) -> DynamicImage {
    let img = input.to_rgba8();
    let mut output = DynamicImage::new_rgba8(img.height(), img.width());
    img.rows().enumerate().for_each(|(y, pixels)| {
        pixels.enumerate().for_each(|(x, pixel)| {
            output.put_pixel(y as u32, x as u32, *pixel);
        });
    });
    output
}

/// Grayscale then histogram equalisation over the whole image.
pub fn equalize_hist_in_gray(img: &DynamicImage) -> GrayImage {
    let mut gray = img.to_luma8();
    let len = gray.len();

    // distribution
    let mut df = [0usize; 256];
    for v in gray.iter() {
        df[*v as usize] += 1;
    }
    // cdf
    let mut temp = df[0];
    df.iter_mut().skip(1).for_each(|v| {
        *v += temp;
        temp = *v;
    });
    let cdf_min = match df.iter().find(|v| **v != 0) {
        Some(min) => *min,
        None => return gray,
    };
    // single colour image, nothing to spread
    if len == cdf_min {
        return gray;
    }
    gray.iter_mut().for_each(|v| {
        let x = df[*v as usize] - cdf_min;
        let y = len - cdf_min;
        *v = ((x as f32/y as f32)*255.0).round() as u8;
    });
    gray
}

/// Pixel bytes in BGR channel order, the layout the plate graphs were trained on.
pub fn to_bgr_vec(img: &RgbImage) -> Vec<u8> {
    img.pixels().flat_map(|p| [p[2], p[1], p[0]]).collect()
}


#[cfg(test)]
mod test {

    use super::*;
    use image::{ GenericImageView, Luma, Rgb, Rgba };

    #[test]
    fn argmax_per_row() {
        let scores = [0.1, 0.7, 0.2, 0.5, 0.1, 0.4];
        assert_eq!(argmax_in_axis0(&scores, &[2, 3]), vec![1, 0]);
    }

    #[test]
    fn transpose_swaps_axes() {
        let mut img = DynamicImage::new_rgba8(3, 2);
        img.put_pixel(2, 0, Rgba([9, 9, 9, 255]));
        let t = transpose(&img);
        assert_eq!((t.width(), t.height()), (2, 3));
        assert_eq!(t.to_rgba8().get_pixel(0, 2), &Rgba([9, 9, 9, 255]));
    }

    #[test]
    fn equalization_spreads_to_full_range() {
        let mut gray = GrayImage::new(2, 1);
        gray.put_pixel(0, 0, Luma([100]));
        gray.put_pixel(1, 0, Luma([110]));
        let eq = equalize_hist_in_gray(&DynamicImage::ImageLuma8(gray));
        assert_eq!(eq.get_pixel(0, 0), &Luma([0]));
        assert_eq!(eq.get_pixel(1, 0), &Luma([255]));
    }

    #[test]
    fn flat_image_survives_equalization() {
        let gray = GrayImage::from_pixel(4, 4, Luma([42]));
        let eq = equalize_hist_in_gray(&DynamicImage::ImageLuma8(gray.clone()));
        assert_eq!(eq, gray);
    }

    #[test]
    fn bgr_order() {
        let img = RgbImage::from_pixel(1, 1, Rgb([1, 2, 3]));
        assert_eq!(to_bgr_vec(&img), vec![3, 2, 1]);
    }
}
