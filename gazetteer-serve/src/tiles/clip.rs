//! Ring clipping and cleanup in tile pixel space.
//!
//! Rings are open (no repeated closing vertex) lists of `(x, y)` pixels with
//! `y` growing downwards.

pub(crate) type Ring = Vec<(f64, f64)>;

/// Clip `ring` to the square `[-buffer, extent + buffer]` with
/// Sutherland–Hodgman, one tile edge at a time.
pub(crate) fn clip_ring(ring: &[(f64, f64)], extent: f64, buffer: f64) -> Ring {
    let low = -buffer;
    let high = extent + buffer;
    let mut output = ring.to_vec();
    output = clip_edge(&output, |p| p.0 >= low, |a, b| at_x(a, b, low));
    output = clip_edge(&output, |p| p.0 <= high, |a, b| at_x(a, b, high));
    output = clip_edge(&output, |p| p.1 >= low, |a, b| at_y(a, b, low));
    clip_edge(&output, |p| p.1 <= high, |a, b| at_y(a, b, high))
}

fn at_x(a: (f64, f64), b: (f64, f64), x: f64) -> (f64, f64) {
    let t = (x - a.0) / (b.0 - a.0);
    (x, a.1 + t * (b.1 - a.1))
}

fn at_y(a: (f64, f64), b: (f64, f64), y: f64) -> (f64, f64) {
    let t = (y - a.1) / (b.1 - a.1);
    (a.0 + t * (b.0 - a.0), y)
}

fn clip_edge<F, I>(ring: &[(f64, f64)], inside: F, intersect: I) -> Ring
where
    F: Fn((f64, f64)) -> bool,
    I: Fn((f64, f64), (f64, f64)) -> (f64, f64),
{
    let mut output = Vec::with_capacity(ring.len() + 4);
    let Some(&last) = ring.last() else {
        return output;
    };
    let mut previous = last;
    for &current in ring {
        match (inside(previous), inside(current)) {
            (true, true) => output.push(current),
            (true, false) => output.push(intersect(previous, current)),
            (false, true) => {
                output.push(intersect(previous, current));
                output.push(current);
            }
            (false, false) => {}
        }
        previous = current;
    }
    output
}

/// Snap to whole pixels and drop consecutive duplicates, the closing
/// duplicate and `A-B-A` spikes. Rings left with fewer than three distinct
/// vertices or no area come back empty.
pub(crate) fn clean_ring(ring: &[(f64, f64)]) -> Ring {
    let mut cleaned: Ring = Vec::with_capacity(ring.len());
    for &(x, y) in ring {
        let point = (x.round(), y.round());
        if cleaned.last() == Some(&point) {
            continue;
        }
        let len = cleaned.len();
        if len >= 2 && cleaned.get(len - 2) == Some(&point) {
            cleaned.pop();
            continue;
        }
        cleaned.push(point);
    }
    while cleaned.len() > 1 && cleaned.first() == cleaned.last() {
        cleaned.pop();
    }
    if cleaned.len() < 3 || signed_area(&cleaned) == 0.0 {
        return Vec::new();
    }
    cleaned
}

/// Shoelace area; positive means clockwise on screen.
pub(crate) fn signed_area(ring: &[(f64, f64)]) -> f64 {
    let Some(&last) = ring.last() else {
        return 0.0;
    };
    let mut previous = last;
    let mut twice = 0.0;
    for &current in ring {
        twice += previous.0 * current.1 - current.0 * previous.1;
        previous = current;
    }
    twice / 2.0
}

/// Orient exteriors clockwise and holes anticlockwise on screen, as vector
/// tile decoders expect.
pub(crate) fn enforce_winding(mut ring: Ring, exterior: bool) -> Ring {
    let clockwise = signed_area(&ring) > 0.0;
    if clockwise != exterior {
        ring.reverse();
    }
    ring
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn square(min: f64, max: f64) -> Ring {
        vec![(min, min), (max, min), (max, max), (min, max)]
    }

    #[rstest]
    fn rings_inside_the_buffer_are_untouched() {
        let ring = square(10.0, 100.0);
        assert_eq!(clip_ring(&ring, 4096.0, 64.0), ring);
    }

    #[rstest]
    fn overhanging_rings_are_cut_at_the_buffer() {
        let ring = square(-1000.0, 5000.0);
        let clipped = clip_ring(&ring, 4096.0, 64.0);
        assert!(!clipped.is_empty());
        assert!(
            clipped
                .iter()
                .all(|&(x, y)| (-64.0..=4160.0).contains(&x) && (-64.0..=4160.0).contains(&y))
        );
        let area = signed_area(&clean_ring(&clipped)).abs();
        assert!((area - 4224.0_f64.powi(2)).abs() < 1.0);
    }

    #[rstest]
    fn rings_outside_vanish() {
        assert!(clip_ring(&square(5000.0, 6000.0), 4096.0, 64.0).is_empty());
    }

    #[rstest]
    fn cleaning_removes_duplicates_and_spikes() {
        let ring = vec![
            (0.2, 0.1),
            (0.0, 0.0),
            (10.0, 0.0),
            (20.0, 0.0),
            (10.0, 0.0),
            (10.0, 10.0),
            (0.0, 10.0),
            (0.0, 0.0),
        ];
        assert_eq!(
            clean_ring(&ring),
            vec![(0.0, 0.0), (10.0, 0.0), (10.0, 10.0), (0.0, 10.0)]
        );
    }

    #[rstest]
    fn slivers_collapse() {
        let ring = vec![(0.1, 0.1), (0.4, 0.2), (0.2, 0.4)];
        assert!(clean_ring(&ring).is_empty());
    }

    #[rstest]
    #[case(true, true)]
    #[case(false, false)]
    fn winding_follows_ring_role(#[case] exterior: bool, #[case] clockwise: bool) {
        for ring in [square(0.0, 10.0), {
            let mut reversed = square(0.0, 10.0);
            reversed.reverse();
            reversed
        }] {
            let oriented = enforce_winding(ring, exterior);
            assert_eq!(signed_area(&oriented) > 0.0, clockwise);
        }
    }
}
