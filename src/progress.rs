//! Reading-progress arithmetic.

/// Whole-percent progress through a book, from the chapter the reader is on
/// and the book's chapter count. Clamped to 0..=100; a book with no chapters
/// reads as 0.
pub fn chapter_progress(current_chapter: i64, total_chapters: i64) -> i64 {
    if total_chapters <= 0 {
        return 0;
    }
    let current = current_chapter.clamp(0, total_chapters);
    ((current as f64 / total_chapters as f64) * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_to_nearest_percent() {
        assert_eq!(chapter_progress(1, 3), 33);
        assert_eq!(chapter_progress(2, 3), 67);
        assert_eq!(chapter_progress(50, 50), 100);
        assert_eq!(chapter_progress(1, 8), 13);
    }

    #[test]
    fn clamps_out_of_range_input() {
        assert_eq!(chapter_progress(0, 10), 0);
        assert_eq!(chapter_progress(-4, 10), 0);
        assert_eq!(chapter_progress(12, 10), 100);
    }

    #[test]
    fn chapterless_book_is_zero() {
        assert_eq!(chapter_progress(3, 0), 0);
        assert_eq!(chapter_progress(3, -1), 0);
    }
}
