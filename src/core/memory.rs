//! Memory accounting helpers shared by the platform backends

/// One entry of a working-set page list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkingSetPage {
    pub protection: u8,
    pub share_count: u8,
    pub shared: bool,
}

impl WorkingSetPage {
    /// Decode a `MEMORY_WORKING_SET_BLOCK` bitfield:
    /// bits 0-4 protection, 5-7 share count, bit 8 shared.
    pub fn from_block(block: usize) -> Self {
        WorkingSetPage {
            protection: (block & 0x1F) as u8,
            share_count: ((block >> 5) & 0x7) as u8,
            shared: (block >> 8) & 1 == 1,
        }
    }

    /// A page is private when it is not shared at all, or when at most one
    /// process maps it.
    pub fn is_private(&self) -> bool {
        !self.shared || self.share_count <= 1
    }
}

/// Number of pages that count toward the unique set size.
pub fn count_private_pages<I>(pages: I) -> u64
where
    I: IntoIterator<Item = WorkingSetPage>,
{
    pages.into_iter().filter(WorkingSetPage::is_private).count() as u64
}

/// Render a Windows page-protection value the way memory maps report it.
pub fn protection_string(protect: u32) -> &'static str {
    match protect & 0xFF {
        0x01 => "",
        0x02 => "r",
        0x04 => "rw",
        0x08 => "wc",
        0x10 => "x",
        0x20 => "xr",
        0x40 => "xrw",
        0x80 => "xwc",
        _ => "?",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shared_page(share_count: u8) -> WorkingSetPage {
        WorkingSetPage {
            protection: 4,
            share_count,
            shared: true,
        }
    }

    #[test]
    fn test_share_count_threshold() {
        let pages = [0, 1, 1, 2, 3].map(shared_page);
        assert_eq!(count_private_pages(pages), 3);
    }

    #[test]
    fn test_unshared_pages_are_private() {
        let pages = [
            WorkingSetPage {
                protection: 4,
                share_count: 7,
                shared: false,
            },
            shared_page(2),
        ];
        assert_eq!(count_private_pages(pages), 1);
    }

    #[test]
    fn test_block_decoding() {
        // protection 4, share count 3, shared, virtual page 0x1234
        let block = 4 | (3 << 5) | (1 << 8) | (0x1234 << 12);
        let page = WorkingSetPage::from_block(block);
        assert_eq!(page.protection, 4);
        assert_eq!(page.share_count, 3);
        assert!(page.shared);
        assert!(!page.is_private());

        let page = WorkingSetPage::from_block(1 | (1 << 5));
        assert!(!page.shared);
        assert!(page.is_private());
    }

    #[test]
    fn test_protection_strings() {
        assert_eq!(protection_string(0x01), "");
        assert_eq!(protection_string(0x04), "rw");
        assert_eq!(protection_string(0x20), "xr");
        assert_eq!(protection_string(0x80), "xwc");
        // PAGE_GUARD | PAGE_READWRITE keeps the base protection
        assert_eq!(protection_string(0x104), "rw");
        assert_eq!(protection_string(0x03), "?");
    }
}
