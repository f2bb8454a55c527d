pub mod flash_selection;
