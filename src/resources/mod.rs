/**
 * This module contains all logic for reading and writing external files:
 * the glTF document, source images and KTX2 containers.
 */
pub mod document;
pub mod ktx2;
pub mod texture;
